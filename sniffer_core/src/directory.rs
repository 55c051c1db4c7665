//! Stream Path Directory.
//!
//! Correlates HTTP/2 stream identifiers with the RPC method path seen in the
//! `:path` pseudo-header. The request direction of a connection records the path,
//! the response direction looks it up through the reverse [`FlowKey`]. All workers
//! share one directory behind a single read-write lock.
//!
//! Stream identifiers are only unique while an exchange is open. A stream id that
//! gets reused on the same connection keeps the first recorded path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::alias::{FnvHashMap, PRwLock};
use crate::connection::FlowKey;
use crate::debug_log;

/// Which half of an RPC exchange a half-connection carries for a given stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Unknown,
    Request,
    Response,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Unknown => "unknown",
            Side::Request => "request",
            Side::Response => "response",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one half-connection has learned about one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    pub path: Option<String>,
    pub side: Side,
}

/// Result of [`StreamDirectory::resolve`].
///
/// An unresolved lookup is the default value: no path, unknown side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub path: Option<String>,
    pub side: Side,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }

    /// The method path, or `""` when unresolved.
    pub fn path_str(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

type Streams = FnvHashMap<u32, StreamRecord>;

#[derive(Debug, Default)]
pub struct StreamDirectory {
    flows: PRwLock<HashMap<FlowKey, Streams>>,
}

impl StreamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common case of sharing the directory across workers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record the method path for `(flow, stream_id)` unless one is already set.
    ///
    /// Returns `true` when this call set the path.
    pub fn record_path(&self, flow: FlowKey, stream_id: u32, path: &str) -> bool {
        let mut flows = self.flows.write();
        let record = flows.entry(flow).or_default().entry(stream_id).or_default();
        if record.path.is_some() {
            return false;
        }
        debug_log!("directory: {} stream {} path {}", flow, stream_id, path);
        record.path = Some(path.to_owned());
        true
    }

    /// Set the side for `(flow, stream_id)` unless it is already known.
    ///
    /// Returns `true` when this call changed the side.
    pub fn mark_side(&self, flow: FlowKey, stream_id: u32, side: Side) -> bool {
        if side == Side::Unknown {
            return false;
        }
        let mut flows = self.flows.write();
        let record = flows.entry(flow).or_default().entry(stream_id).or_default();
        if record.side != Side::Unknown {
            return false;
        }
        debug_log!("directory: {} stream {} side {}", flow, stream_id, side);
        record.side = side;
        true
    }

    /// Look up what is known about `(flow, stream_id)`.
    ///
    /// The own record wins. When it has no path (the response direction never sees
    /// `:path`) the path comes from the reverse direction. When only the reverse
    /// record exists its path is used and the side stays unknown, since side is
    /// relative to the observing half-connection.
    pub fn resolve(&self, flow: FlowKey, stream_id: u32) -> Resolution {
        let flows = self.flows.read();
        let own = flows.get(&flow).and_then(|streams| streams.get(&stream_id));
        let reverse = || {
            flows
                .get(&flow.reverse())
                .and_then(|streams| streams.get(&stream_id))
        };

        match own {
            Some(record) => Resolution {
                path: record
                    .path
                    .clone()
                    .or_else(|| reverse().and_then(|r| r.path.clone())),
                side: record.side,
            },
            None => Resolution {
                path: reverse().and_then(|r| r.path.clone()),
                side: Side::Unknown,
            },
        }
    }

    /// The raw record stored under `(flow, stream_id)`, without reverse fallback.
    pub fn record(&self, flow: FlowKey, stream_id: u32) -> Option<StreamRecord> {
        self.flows
            .read()
            .get(&flow)
            .and_then(|streams| streams.get(&stream_id))
            .cloned()
    }

    /// Remove every entry under `flow`. Returns how many stream records were dropped.
    pub fn evict(&self, flow: FlowKey) -> usize {
        self.flows
            .write()
            .remove(&flow)
            .map(|streams| streams.len())
            .unwrap_or(0)
    }

    /// Remove every entry under `flow` and its reverse in one critical section.
    pub fn evict_connection(&self, flow: FlowKey) -> usize {
        let mut flows = self.flows.write();
        let removed = flow
            .both()
            .iter()
            .filter_map(|key| flows.remove(key))
            .map(|streams| streams.len())
            .sum();
        debug_log!("directory: evicted {} stream(s) for {}", removed, flow);
        removed
    }

    pub fn contains_flow(&self, flow: FlowKey) -> bool {
        self.flows.read().contains_key(&flow)
    }

    pub fn stream_count(&self, flow: FlowKey) -> usize {
        self.flows.read().get(&flow).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of flow directions currently tracked.
    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }
}

/// Evicts a connection's entries from the directory when dropped.
///
/// A worker creates one as soon as it starts, so its entries disappear on every
/// exit path, including unwinding.
#[must_use = "the connection is evicted as soon as the guard is dropped"]
pub struct EvictionGuard {
    directory: Arc<StreamDirectory>,
    flow: FlowKey,
}

impl EvictionGuard {
    pub fn new(directory: Arc<StreamDirectory>, flow: FlowKey) -> Self {
        Self { directory, flow }
    }

    pub fn flow(&self) -> FlowKey {
        self.flow
    }
}

impl Drop for EvictionGuard {
    fn drop(&mut self) {
        self.directory.evict_connection(self.flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const SAY_HELLO: &str = "/greeter.Greeter/SayHello";

    fn ab() -> FlowKey {
        FlowKey::new("10.0.0.1:51000".parse().unwrap(), "10.0.0.2:50051".parse().unwrap())
    }

    fn other() -> FlowKey {
        FlowKey::new("10.0.0.3:42000".parse().unwrap(), "10.0.0.2:50051".parse().unwrap())
    }

    #[test]
    fn test_first_path_wins() {
        let dir = StreamDirectory::new();
        assert!(dir.record_path(ab(), 1, SAY_HELLO));
        assert!(!dir.record_path(ab(), 1, "/greeter.Greeter/Other"));
        assert_eq!(dir.resolve(ab(), 1).path.as_deref(), Some(SAY_HELLO));
    }

    #[test]
    fn test_side_is_monotonic() {
        let dir = StreamDirectory::new();
        assert!(!dir.mark_side(ab(), 1, Side::Unknown));
        assert!(dir.mark_side(ab(), 1, Side::Request));
        assert!(!dir.mark_side(ab(), 1, Side::Response));
        assert_eq!(dir.resolve(ab(), 1).side, Side::Request);
    }

    #[test]
    fn test_resolve_through_reverse_direction() {
        let dir = StreamDirectory::new();
        dir.record_path(ab(), 3, SAY_HELLO);
        dir.mark_side(ab(), 3, Side::Request);

        // The response direction has not seen anything yet.
        let res = dir.resolve(ab().reverse(), 3);
        assert_eq!(res.path.as_deref(), Some(SAY_HELLO));
        assert_eq!(res.side, Side::Unknown);

        // Once `:status` is seen the own record supplies the side.
        dir.mark_side(ab().reverse(), 3, Side::Response);
        let res = dir.resolve(ab().reverse(), 3);
        assert_eq!(res.path.as_deref(), Some(SAY_HELLO));
        assert_eq!(res.side, Side::Response);
    }

    #[test]
    fn test_unresolved_lookup() {
        let dir = StreamDirectory::new();
        let res = dir.resolve(ab(), 5);
        assert!(!res.is_resolved());
        assert_eq!(res.path_str(), "");
        assert_eq!(res, Resolution::default());
    }

    #[test]
    fn test_other_keys_do_not_interfere() {
        let dir = StreamDirectory::new();
        dir.record_path(ab(), 1, SAY_HELLO);

        dir.record_path(other(), 1, "/other.Service/Call");
        dir.mark_side(other(), 7, Side::Response);
        dir.evict_connection(other());

        assert_eq!(dir.resolve(ab(), 1).path.as_deref(), Some(SAY_HELLO));
        assert_eq!(dir.stream_count(ab()), 1);
    }

    #[test]
    fn test_evict_removes_only_that_direction() {
        let dir = StreamDirectory::new();
        dir.record_path(ab(), 1, SAY_HELLO);
        dir.mark_side(ab().reverse(), 1, Side::Response);

        assert_eq!(dir.evict(ab()), 1);
        assert!(!dir.contains_flow(ab()));
        assert!(dir.contains_flow(ab().reverse()));
        assert_eq!(dir.evict(ab()), 0);
    }

    #[test]
    fn test_eviction_guard_clears_both_directions() {
        let dir = StreamDirectory::shared();
        dir.record_path(ab(), 1, SAY_HELLO);
        dir.mark_side(ab().reverse(), 1, Side::Response);
        dir.record_path(other(), 1, "/other.Service/Call");

        {
            let guard = EvictionGuard::new(dir.clone(), ab().reverse());
            assert_eq!(guard.flow(), ab().reverse());
        }

        assert!(!dir.resolve(ab(), 1).is_resolved());
        assert!(!dir.resolve(ab().reverse(), 1).is_resolved());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_eviction_guard_runs_on_unwind() {
        let dir = StreamDirectory::shared();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = EvictionGuard::new(dir.clone(), ab());
            dir.record_path(ab(), 1, SAY_HELLO);
            dir.record_path(ab().reverse(), 3, SAY_HELLO);
            panic!("worker died mid-stream");
        }));

        assert!(panicked.is_err());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_record_returns_raw_entry() {
        let dir = StreamDirectory::new();
        dir.mark_side(ab().reverse(), 9, Side::Response);
        assert_eq!(
            dir.record(ab().reverse(), 9),
            Some(StreamRecord { path: None, side: Side::Response })
        );
        assert_eq!(dir.record(ab(), 9), None);
    }

    #[test]
    fn test_concurrent_workers() {
        let dir = StreamDirectory::shared();
        let flows: Vec<FlowKey> = (0..8u16)
            .map(|i| {
                FlowKey::new(
                    format!("10.1.0.{}:{}", i + 1, 40000 + i).parse().unwrap(),
                    "10.0.0.2:50051".parse().unwrap(),
                )
            })
            .collect();

        std::thread::scope(|scope| {
            for flow in &flows {
                let dir = &dir;
                scope.spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..200 {
                        let id: u32 = rng.gen_range(1..64) * 2 + 1;
                        dir.record_path(*flow, id, &format!("/svc.S/{}", flow.src.port()));
                        dir.mark_side(flow.reverse(), id, Side::Response);
                        let res = dir.resolve(flow.reverse(), id);
                        assert_eq!(res.path, Some(format!("/svc.S/{}", flow.src.port())));
                    }
                });
            }
        });

        for flow in &flows {
            dir.evict_connection(*flow);
        }
        assert!(dir.is_empty());
    }
}
