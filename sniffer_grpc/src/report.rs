//! Reporting sinks for decoded messages.

use std::fmt;

use sniffer_core::{FlowKey, PMutex, Side};

use crate::dispatch::DecodedMessage;

/// One decoded message, tagged with where it was seen.
#[derive(Debug)]
pub struct Report {
    pub flow: FlowKey,
    pub stream_id: u32,
    /// Method path, empty when the stream could not be correlated.
    pub path: String,
    pub side: Side,
    pub message: DecodedMessage,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<unknown>" } else { &self.path };
        write!(
            f,
            "[{}] stream {} {} ({}): {}",
            self.flow, self.stream_id, path, self.side, self.message
        )
    }
}

/// Where reports go. Fire-and-forget: a sink cannot push back on the worker.
pub trait Reporter: Send + Sync {
    fn emit(&self, report: Report);
}

impl<F> Reporter for F
where
    F: Fn(Report) + Send + Sync,
{
    fn emit(&self, report: Report) {
        self(report)
    }
}

/// Logs every report at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn emit(&self, report: Report) {
        tracing::info!(
            flow = %report.flow,
            stream_id = report.stream_id,
            path = %report.path,
            side = %report.side,
            kind = report.message.kind(),
            "{}",
            report.message
        );
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: PMutex<Vec<Report>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the reports collected so far.
    pub fn take(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl Reporter for CollectingReporter {
    fn emit(&self, report: Report) {
        self.reports.lock().push(report);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn emit(&self, _report: Report) {}
}
