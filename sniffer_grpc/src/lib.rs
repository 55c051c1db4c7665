//! gRPC decoding for the passive HTTP/2 sniffer.
//!
//! This crate sits on top of `h2peek`'s frame reader. A [`HalfConnectionWorker`]
//! reads one direction of a captured connection, correlates streams with their
//! method path through the shared [`StreamDirectory`](sniffer_core::StreamDirectory),
//! lifts messages out of their gRPC envelopes and decodes them: with a registered
//! prost type when the path is known, otherwise with the schema-free wire decoder.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sniffer_grpc::prelude::*;
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct HelloRequest {
//!     #[prost(string, tag = "1")]
//!     name: String,
//! }
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct HelloReply {
//!     #[prost(string, tag = "1")]
//!     message: String,
//! }
//!
//! let registry = SchemaRegistry::builder()
//!     .method::<HelloRequest, HelloReply>("/greeter.Greeter/SayHello")
//!     .build()
//!     .unwrap();
//! let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(TracingReporter));
//!
//! let body = bytes::Bytes::from_static(b"\x0a\x04grpc");
//! let decoded = dispatcher.decode("/greeter.Greeter/SayHello", Side::Request, &body);
//! assert_eq!(decoded.downcast_ref::<HelloRequest>().unwrap().name, "grpc");
//! ```

pub mod dispatch;
pub mod message;
pub mod registry;
pub mod report;
pub mod wire;
pub mod worker;

// Re-export key types
pub use dispatch::{DecodedMessage, Dispatcher};
pub use message::{Envelopes, ExtractError, RawMessage};
pub use registry::{MessagePrototype, MethodPath, RegistryError, SchemaRegistry, TypedMessage};
pub use report::{CollectingReporter, NoopReporter, Report, Reporter, TracingReporter};
pub use wire::{WireError, WireTree, WireValue};
pub use worker::{HalfConnectionWorker, WorkerSummary};

pub use prost::Message;

pub mod prelude {
    //! Common imports for embedding the sniffer

    pub use crate::{
        CollectingReporter, DecodedMessage, Dispatcher, HalfConnectionWorker, Message, NoopReporter,
        Report, Reporter, SchemaRegistry, TracingReporter, WorkerSummary,
    };

    pub use sniffer_core::{FlowKey, Side, StreamDirectory};
}



#[cfg(test)]
mod tests {
    use super::greeter::{HelloReply, HelloRequest, SAY_HELLO};
    use super::testing::{data, headers, Encoder, PREFACE_AND_SETTINGS};
    use super::*;
    use sniffer_core::{FlowKey, Side, StreamDirectory};
    use std::sync::Arc;

    fn endpoints() -> (FlowKey, FlowKey) {
        let a_to_b = FlowKey::from(("192.168.1.10:51000".parse().unwrap(), "192.168.1.20:50051".parse().unwrap()));
        (a_to_b, a_to_b.reverse())
    }

    fn dispatcher(reporter: Arc<CollectingReporter>) -> Dispatcher {
        let registry = SchemaRegistry::builder()
            .method::<HelloRequest, HelloReply>(SAY_HELLO)
            .build()
            .unwrap();
        Dispatcher::new(Arc::new(registry), reporter)
    }

    #[tokio::test]
    async fn test_response_decodes_through_peer_path() {
        let (a_to_b, b_to_a) = endpoints();
        let directory = StreamDirectory::shared();
        let reporter = Arc::new(CollectingReporter::new());
        let dispatcher = dispatcher(reporter.clone());

        // A -> B announces the method; keep the directory alive with a live feed.
        let (mut feed, stream) = sniffer_core::half_connection(a_to_b, 1024);
        let request_worker = tokio::spawn(
            HalfConnectionWorker::new(a_to_b, stream, directory.clone(), dispatcher.clone()).run(),
        );
        let mut encoder = Encoder::new();
        let mut client = PREFACE_AND_SETTINGS.to_vec();
        client.extend(headers(&mut encoder, 1, &[(":method", "POST"), (":path", SAY_HELLO)]));
        feed.push(&client).await.unwrap();

        // Wait until the request side has recorded the path.
        for _ in 0..100 {
            if directory.resolve(a_to_b, 1).is_resolved() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(directory.resolve(b_to_a, 1).path_str(), SAY_HELLO);

        // B -> A answers on the same stream.
        let reply = HelloReply { message: "Hello A".into() };
        let mut encoder = Encoder::new();
        let mut server = headers(&mut encoder, 1, &[(":status", "200"), ("content-type", "application/grpc")]);
        server.extend(data(1, &RawMessage::encode(false, &reply.encode_to_vec()), false));
        let summary = HalfConnectionWorker::new(b_to_a, &server[..], directory.clone(), dispatcher)
            .run()
            .await;
        assert_eq!(summary.messages, 1);

        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].flow, b_to_a);
        assert_eq!(reports[0].path, SAY_HELLO);
        assert_eq!(reports[0].side, Side::Response);
        assert_eq!(reports[0].message.downcast_ref::<HelloReply>(), Some(&reply));

        // The response worker ending evicted both directions.
        assert!(!directory.resolve(a_to_b, 1).is_resolved());

        feed.close().await.unwrap();
        request_worker.await.unwrap();
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_compressed_message_is_reported_undecoded() {
        let (a_to_b, _) = endpoints();
        let directory = StreamDirectory::shared();
        let reporter = Arc::new(CollectingReporter::new());

        let mut encoder = Encoder::new();
        let mut bytes = headers(&mut encoder, 3, &[(":path", SAY_HELLO), ("grpc-encoding", "gzip")]);
        bytes.extend(data(3, &RawMessage::encode(true, b"\x1f\x8b\x08\x00\x00"), true));

        HalfConnectionWorker::new(a_to_b, &bytes[..], directory, dispatcher(reporter.clone()))
            .run()
            .await;

        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message.kind(), "compressed");
        assert_eq!(reports[0].message.to_string(), "<compressed, 5 bytes>");
    }

    #[tokio::test]
    async fn test_ascii_field_stays_bytes() {
        let (a_to_b, _) = endpoints();
        let reporter = Arc::new(CollectingReporter::new());
        // Unregistered method: the generic decoder handles it.
        let mut encoder = Encoder::new();
        let mut bytes = headers(&mut encoder, 1, &[(":path", "/inventory.Stock/Lookup")]);
        let body = HelloRequest { name: "Hello world".into(), my_field: String::new() }.encode_to_vec();
        bytes.extend(data(1, &RawMessage::encode(false, &body), false));

        HalfConnectionWorker::new(a_to_b, &bytes[..], StreamDirectory::shared(), dispatcher(reporter.clone()))
            .run()
            .await;

        let reports = reporter.take();
        let tree = reports[0].message.as_generic().unwrap();
        assert_eq!(
            tree.get(1).unwrap().value,
            WireValue::Bytes(bytes::Bytes::from_static(b"Hello world"))
        );
    }
}
