use std::fmt;
use std::io;

use super::flow::FlowKey;

#[derive(Debug)]
pub enum ConnectionError {
    IoError(io::Error),
    /// The worker reading this half-connection is gone, so nothing more can be fed.
    ConnectionClosed(FlowKey),
    /// The worker task ended abnormally (panic or cancellation).
    WorkerFailed(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(err) => write!(f, "I/O error: {}", err),
            Self::ConnectionClosed(flow) => write!(f, "Half-connection {} is already closed", flow),
            Self::WorkerFailed(err) => write!(f, "Worker failed: {}", err),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<tokio::task::JoinError> for ConnectionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::WorkerFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>; 
