use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;

use h2peek::FrameKind;
use h2peek::frame::build::{Encoder, frame, headers};
use sniffer_core::{FlowKey, Side};
use sniffer_grpc::{CollectingReporter, RawMessage, SchemaRegistry};

use crate::{Sniffer, SnifferBuilder};

const SAY_HELLO: &str = "/greeter.Greeter/SayHello";
const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Clone, PartialEq, prost::Message)]
struct HelloRequest {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(string, tag = "2")]
    my_field: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct HelloReply {
    #[prost(string, tag = "1")]
    message: String,
}

fn client_flow() -> FlowKey {
    FlowKey::from(("172.16.0.5:43210".parse().unwrap(), "172.16.0.9:50051".parse().unwrap()))
}

fn grpc_data(stream_id: u32, message: &impl Message) -> Vec<u8> {
    frame(FrameKind::Data, 0, stream_id, &RawMessage::encode(false, &message.encode_to_vec()))
}

fn greeter_sniffer() -> (Arc<Sniffer>, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::new());
    let registry = SchemaRegistry::builder()
        .method::<HelloRequest, HelloReply>(SAY_HELLO)
        .build()
        .unwrap();
    let sniffer = Sniffer::new()
        .registry(registry)
        .shared_reporter(reporter.clone())
        .build();
    (sniffer, reporter)
}

async fn wait_for_path(sniffer: &Arc<Sniffer>, flow: FlowKey, stream_id: u32) {
    for _ in 0..200 {
        if sniffer.directory().resolve(flow, stream_id).is_resolved() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("path for {} stream {} never recorded", flow, stream_id);
}

async fn wait_for_reports(reporter: &CollectingReporter, count: usize) {
    for _ in 0..200 {
        if reporter.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} report(s), got {}", count, reporter.len());
}

#[tokio::test]
async fn test_unary_call_both_directions() {
    let (sniffer, reporter) = greeter_sniffer();
    let (mut client, mut server) = sniffer.open_connection(client_flow());

    let request = HelloRequest { name: "Alice".into(), my_field: "x".into() };
    let reply = HelloReply { message: "Hello Alice".into() };

    let mut client_hpack = Encoder::new();
    let mut upstream = PREFACE.to_vec();
    upstream.extend(frame(FrameKind::Settings, 0, 0, &[]));
    upstream.extend(headers(
        &mut client_hpack,
        1,
        &[(":method", "POST"), (":scheme", "http"), (":path", SAY_HELLO), ("content-type", "application/grpc")],
    ));
    upstream.extend(grpc_data(1, &request));
    client.push(&upstream).await.unwrap();
    wait_for_path(&sniffer, client.flow(), 1).await;
    wait_for_reports(&reporter, 1).await;

    let mut server_hpack = Encoder::new();
    let mut downstream = frame(FrameKind::Settings, 0, 0, &[]);
    downstream.extend(headers(&mut server_hpack, 1, &[(":status", "200"), ("content-type", "application/grpc")]));
    downstream.extend(grpc_data(1, &reply));
    downstream.extend(headers(&mut server_hpack, 1, &[("grpc-status", "0")]));
    server.push(&downstream).await.unwrap();

    let server_flow = server.flow();
    let server_summary = server.finish().await.unwrap();
    let client_summary = client.finish().await.unwrap();
    assert_eq!(client_summary.messages, 1);
    assert_eq!(server_summary.messages, 1);
    assert_eq!(server_summary.headers, 2);

    let reports = reporter.take();
    assert_eq!(reports.len(), 2);

    let sent = reports.iter().find(|r| r.side == Side::Request).unwrap();
    assert_eq!(sent.path, SAY_HELLO);
    assert_eq!(sent.message.downcast_ref::<HelloRequest>(), Some(&request));

    let answered = reports.iter().find(|r| r.flow == server_flow).unwrap();
    assert_eq!(answered.side, Side::Response);
    assert_eq!(answered.path, SAY_HELLO);
    assert_eq!(answered.message.downcast_ref::<HelloReply>(), Some(&reply));

    assert!(sniffer.directory().is_empty());
}

#[tokio::test]
async fn test_interleaved_streams_keep_their_paths() {
    let (sniffer, reporter) = greeter_sniffer();
    let flow = client_flow();

    let mut encoder = Encoder::new();
    let mut bytes = PREFACE.to_vec();
    bytes.extend(headers(&mut encoder, 1, &[(":path", SAY_HELLO)]));
    bytes.extend(headers(&mut encoder, 3, &[(":path", "/inventory.Stock/Lookup")]));
    bytes.extend(grpc_data(3, &HelloRequest { name: "Bob".into(), my_field: String::new() }));
    bytes.extend(grpc_data(1, &HelloRequest { name: "Carol".into(), my_field: String::new() }));

    let summary = sniffer.spawn(flow, Cursor::new(bytes)).await.unwrap();
    assert_eq!(summary.messages, 2);

    let reports = reporter.take();
    assert_eq!(reports[0].stream_id, 3);
    assert_eq!(reports[0].path, "/inventory.Stock/Lookup");
    assert_eq!(reports[0].message.kind(), "generic");
    assert_eq!(reports[1].stream_id, 1);
    assert_eq!(
        reports[1].message.downcast_ref::<HelloRequest>().map(|r| r.name.as_str()),
        Some("Carol")
    );
}

#[tokio::test]
async fn test_empty_registry_decodes_generically() {
    let reporter = Arc::new(CollectingReporter::new());
    let sniffer = SnifferBuilder::new().shared_reporter(reporter.clone()).build();
    assert!(sniffer.registry().is_empty());

    let mut encoder = Encoder::new();
    let mut bytes = headers(&mut encoder, 1, &[(":path", SAY_HELLO)]);
    bytes.extend(grpc_data(1, &HelloReply { message: "Hello world".into() }));

    let mut half = sniffer.open(client_flow());
    half.push(&bytes).await.unwrap();
    half.finish().await.unwrap();

    let reports = reporter.take();
    assert_eq!(reports.len(), 1);
    let tree = reports[0].message.as_generic().unwrap();
    assert_eq!(tree.to_string(), "tag=1 bytes=\"Hello world\"\n");
}

#[tokio::test]
async fn test_finished_connection_is_evicted() {
    let (sniffer, _reporter) = greeter_sniffer();
    let flow = client_flow();

    let mut encoder = Encoder::new();
    let bytes = headers(&mut encoder, 1, &[(":path", SAY_HELLO)]);

    let mut first = sniffer.open(flow);
    first.push(&bytes).await.unwrap();
    wait_for_path(&sniffer, flow, 1).await;
    first.finish().await.unwrap();

    // A new connection on the same 4-tuple starts from nothing.
    assert!(!sniffer.directory().resolve(flow, 1).is_resolved());
    assert!(!sniffer.directory().resolve(flow.reverse(), 1).is_resolved());
    assert!(!sniffer.directory().contains_flow(flow));
}

#[tokio::test]
async fn test_aborted_connection_is_evicted() {
    let (sniffer, _reporter) = greeter_sniffer();
    let flow = client_flow();

    let mut encoder = Encoder::new();
    let mut half = sniffer.open(flow);
    half.push(&headers(&mut encoder, 1, &[(":path", SAY_HELLO)])).await.unwrap();
    wait_for_path(&sniffer, flow, 1).await;

    half.abort();
    for _ in 0..200 {
        if sniffer.directory().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("aborted worker left {} in the directory", flow);
}

#[tokio::test]
async fn test_idle_timeout_flushes_half_connection() {
    let sniffer = Sniffer::new()
        .reporter(sniffer_grpc::NoopReporter)
        .idle_timeout(Duration::from_millis(20))
        .feed_capacity(256)
        .build();
    assert_eq!(sniffer.reader_settings().idle_timeout, Some(Duration::from_millis(20)));
    assert_eq!(sniffer.feed_capacity(), 256);

    let half = sniffer.open(client_flow());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(half.is_finished());

    let summary = half.finish().await.unwrap();
    assert!(summary.idle_flushed);
}

#[tokio::test]
async fn test_push_after_worker_exit_fails() {
    let sniffer = Sniffer::new()
        .reporter(sniffer_grpc::NoopReporter)
        .idle_timeout(Duration::from_millis(10))
        .build();

    let mut half = sniffer.open(client_flow());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = half.push(b"\0\0\0\x04\0\0\0\0\0").await.unwrap_err();
    assert!(matches!(err, crate::ConnectionError::ConnectionClosed(flow) if flow == client_flow()));
}
