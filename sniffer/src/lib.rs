pub mod session;
pub mod prelude;

#[cfg(test)]
mod test;

pub use session::{Sniffer, SnifferBuilder, HalfConnection, DEFAULT_FEED_CAPACITY};

pub use sniffer_core::{FlowKey, Side, StreamDirectory, Resolution};
pub use sniffer_core::connection::error::{ConnectionError, Result};

pub use h2peek::{Frame, FrameError, FrameReader, ReaderSettings};

pub use sniffer_grpc::{
    DecodedMessage, Dispatcher, HalfConnectionWorker, WorkerSummary,
    RawMessage, Envelopes, ExtractError,
    SchemaRegistry, MessagePrototype, MethodPath, RegistryError, TypedMessage,
    Report, Reporter, TracingReporter, CollectingReporter, NoopReporter,
    WireTree, WireValue, WireError,
};
pub use sniffer_grpc::registry::SchemaRegistryBuilder;
pub use sniffer_grpc::wire::decode as decode_wire;

pub use sniffer_core;
pub use h2peek;
pub use sniffer_grpc;
