pub use crate::{Sniffer, SnifferBuilder, HalfConnection};
pub use crate::{FlowKey, Side};
pub use crate::{SchemaRegistry, DecodedMessage, Report, Reporter, TracingReporter, CollectingReporter};
pub use crate::{ReaderSettings, WorkerSummary};

// Protobuf message trait, for registering prost types
pub use sniffer_grpc::Message;

pub use std::sync::Arc;
pub use std::time::Duration;
pub use tokio;
