// Type aliases (must be declared before other modules that use it)
pub mod alias;

pub mod connection;
pub mod directory;
pub mod debug;

// Re-exported so the dev-log macros can reach it from downstream crates
pub use tracing;

pub use alias::{PRwLock, PRwLockReadGuard, PRwLockWriteGuard, PMutex, PMutexGuard};
pub use connection::{FlowKey, ConnectionError, HalfConnectionFeed, HalfConnectionStream, half_connection};
pub use directory::{StreamDirectory, StreamRecord, Resolution, Side, EvictionGuard};
