//! Directional identity of a captured TCP half-connection.

use std::fmt;
use std::net::SocketAddr;

/// One direction of a TCP connection: bytes flowing from `src` to `dst`.
///
/// A logical connection always yields two keys, each the [`reverse`](FlowKey::reverse)
/// of the other. HTTP/2 stream identifiers are scoped to the logical connection,
/// so the two directions share them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl FlowKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self { src, dst }
    }

    /// The opposite direction of the same connection.
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }

    /// Both directions, own key first.
    pub fn both(&self) -> [FlowKey; 2] {
        [*self, self.reverse()]
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

impl From<(SocketAddr, SocketAddr)> for FlowKey {
    fn from((src, dst): (SocketAddr, SocketAddr)) -> Self {
        Self::new(src, dst)
    }
}
