use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use h2peek::ReaderSettings;
use sniffer_core::connection::{ConnectionError, Result};
use sniffer_core::{half_connection, FlowKey, HalfConnectionFeed, StreamDirectory};
use sniffer_grpc::{Dispatcher, HalfConnectionWorker, Reporter, SchemaRegistry, TracingReporter, WorkerSummary};
use sniffer_grpc::message::DEFAULT_MAX_MESSAGE_LEN;

/// Bytes a feed may hold before `push` waits for the worker.
pub const DEFAULT_FEED_CAPACITY: usize = 64 * 1024;

/// Sniffer owns everything its workers share: the stream directory, the
/// schema registry, the reporting sink and the reader configuration.
pub struct Sniffer {
    directory: Arc<StreamDirectory>,
    dispatcher: Dispatcher,
    reader_settings: ReaderSettings,
    feed_capacity: usize,
    max_message_len: usize,
}

/// Builder for Sniffer
pub struct SnifferBuilder {
    registry: Option<SchemaRegistry>,
    reporter: Option<Arc<dyn Reporter>>,
    reader_settings: Option<ReaderSettings>,
    idle_timeout: Option<Duration>,
    feed_capacity: Option<usize>,
    max_message_len: Option<usize>,
}

impl SnifferBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            reporter: None,
            reader_settings: None,
            idle_timeout: None,
            feed_capacity: None,
            max_message_len: None,
        }
    }

    /// Set the schemas used to decode known methods
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set where decoded messages go. Defaults to logging them with `tracing`
    pub fn reporter<T: Reporter + 'static>(mut self, reporter: T) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Same as `reporter`, for a sink the caller keeps a handle to
    pub fn shared_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn reader_settings(mut self, settings: ReaderSettings) -> Self {
        self.reader_settings = Some(settings);
        self
    }

    /// Treat a half-connection that stays silent this long as flushed.
    /// Overrides the timeout in `reader_settings`
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the per half-connection buffer used by `Sniffer::open`
    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = Some(capacity);
        self
    }

    pub fn max_message_len(mut self, max: usize) -> Self {
        self.max_message_len = Some(max);
        self
    }

    pub fn build(self) -> Arc<Sniffer> {
        let registry = self.registry.unwrap_or_else(SchemaRegistry::empty);
        let reporter = self.reporter.unwrap_or_else(|| Arc::new(TracingReporter));
        let mut reader_settings = self.reader_settings.unwrap_or_default();
        if let Some(timeout) = self.idle_timeout {
            reader_settings = reader_settings.idle_timeout(timeout);
        }
        let feed_capacity = self.feed_capacity.unwrap_or(DEFAULT_FEED_CAPACITY).max(1);
        let max_message_len = self.max_message_len.unwrap_or(DEFAULT_MAX_MESSAGE_LEN);

        Arc::new(Sniffer {
            directory: StreamDirectory::shared(),
            dispatcher: Dispatcher::new(Arc::new(registry), reporter),
            reader_settings,
            feed_capacity,
            max_message_len,
        })
    }
}

impl Default for SnifferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Sniffer {
    pub fn new() -> SnifferBuilder {
        SnifferBuilder::new()
    }

    pub fn directory(self: &Arc<Self>) -> &Arc<StreamDirectory> {
        &self.directory
    }

    pub fn registry(self: &Arc<Self>) -> &Arc<SchemaRegistry> {
        self.dispatcher.registry()
    }

    pub fn reader_settings(self: &Arc<Self>) -> &ReaderSettings {
        &self.reader_settings
    }

    pub fn feed_capacity(self: &Arc<Self>) -> usize {
        self.feed_capacity
    }

    /// Start a worker over any ordered byte stream of one half-connection.
    pub fn spawn<R>(self: &Arc<Self>, flow: FlowKey, io: R) -> JoinHandle<WorkerSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let worker = HalfConnectionWorker::with_settings(
            flow,
            io,
            self.directory.clone(),
            self.dispatcher.clone(),
            self.reader_settings.clone(),
        )
        .max_message_len(self.max_message_len);

        tokio::spawn(async move {
            let summary = worker.run().await;
            tracing::debug!(flow = %flow, "half-connection closed: {}", summary);
            summary
        })
    }

    /// Open a half-connection fed by pushing reassembled bytes.
    pub fn open(self: &Arc<Self>, flow: FlowKey) -> HalfConnection {
        let (feed, stream) = half_connection(flow, self.feed_capacity);
        let handle = self.spawn(flow, stream);
        HalfConnection { feed, handle }
    }

    /// Open both directions of a TCP connection, client to server first.
    pub fn open_connection(self: &Arc<Self>, client_to_server: FlowKey) -> (HalfConnection, HalfConnection) {
        (self.open(client_to_server), self.open(client_to_server.reverse()))
    }
}

/// Write end of one half-connection and the worker reading it.
pub struct HalfConnection {
    feed: HalfConnectionFeed,
    handle: JoinHandle<WorkerSummary>,
}

impl HalfConnection {
    pub fn flow(&self) -> FlowKey {
        self.feed.flow()
    }

    /// Feed reassembled bytes, in order.
    pub async fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.feed.push(bytes).await
    }

    /// Whether the worker has already exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal end of stream and wait for the worker.
    pub async fn finish(mut self) -> Result<WorkerSummary> {
        self.feed.close().await?;
        self.handle.await.map_err(ConnectionError::from)
    }

    /// Stop the worker without waiting for it to drain.
    pub fn abort(self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for HalfConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalfConnection")
            .field("flow", &self.flow())
            .field("pushed", &self.feed.pushed())
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
