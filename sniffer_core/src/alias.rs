//! Type aliases shared by the sniffer crates.
//!
//! Every lock in the sniffer goes through this module so the whole workspace
//! agrees on one implementation.
//!
//! ## Concurrency Primitives
//!
//! `parking_lot` backs every lock:
//! - **No lock poisoning**: a worker that panics while holding the directory
//!   lock does not wedge the other workers
//! - **Guards without `Result`**: `read()` and `write()` hand back the guard directly
//!
//! ### Usage
//!
//! ```rust
//! use sniffer_core::alias::PRwLock;
//!
//! let lock = PRwLock::new(vec![1, 3, 5]);
//! let guard = lock.read();
//! assert_eq!(guard[1], 3);
//! ```

// ============ Concurrency Primitives ============

/// Read-write lock (parking_lot implementation).
///
/// Guards the [`StreamDirectory`](crate::directory::StreamDirectory), which is
/// read on every DATA frame and written on every header frame.
///
/// # Example
///
/// ```rust
/// use sniffer_core::alias::PRwLock;
///
/// let paths = PRwLock::new(String::new());
///
/// paths.write().push_str("/greeter.Greeter/SayHello");
/// assert!(paths.read().starts_with("/greeter"));
/// ```
pub use parking_lot::RwLock as PRwLock;

/// Read guard for [`PRwLock`].
pub use parking_lot::RwLockReadGuard as PRwLockReadGuard;

/// Write guard for [`PRwLock`].
pub use parking_lot::RwLockWriteGuard as PRwLockWriteGuard;

/// Mutex (parking_lot implementation), same guarantees as [`PRwLock`].
///
/// # Example
///
/// ```rust
/// use sniffer_core::alias::PMutex;
///
/// let seen = PMutex::new(Vec::new());
/// seen.lock().push(1u32);
/// assert_eq!(seen.lock().len(), 1);
/// ```
pub use parking_lot::Mutex as PMutex;

/// Mutex guard for [`PMutex`].
pub use parking_lot::MutexGuard as PMutexGuard;

// ============ Collections ============

/// Hash map keyed by small integers such as HTTP/2 stream identifiers.
pub type FnvHashMap<K, V> = fnv::FnvHashMap<K, V>;
