//! Development-time diagnostics.
//!
//! These macros trace the sniffer's internals (frame boundaries, directory
//! updates, decode attempts) while it is being worked on. They are compiled
//! out entirely unless the `dev-log` feature is enabled, in which case they
//! forward to `tracing` under the `sniffer::dev` target.
//!
//! Operational events (skipped frames, reports) go through `tracing` directly
//! and are not affected by the feature.
//!
//! ```bash
//! cargo test --features "dev-log"
//! ```
//!
//! ```rust
//! use sniffer_core::{debug_log, debug_warn};
//!
//! let stream_id = 1;
//! debug_log!("HEADERS on stream {}", stream_id);
//! debug_warn!("stream {} has no recorded path", stream_id);
//! ```

/// General-purpose debug logging macro.
#[macro_export]
#[cfg(feature = "dev-log")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        $crate::tracing::debug!(target: "sniffer::dev", "{}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "dev-log"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Error logging for conditions the sniffer recovers from.
///
/// ```rust
/// use sniffer_core::debug_error;
/// let reason = "truncated varint";
/// debug_error!("generic decode failed: {}", reason);
/// ```
#[macro_export]
#[cfg(feature = "dev-log")]
macro_rules! debug_error {
    ($($arg:tt)*) => {
        $crate::tracing::error!(target: "sniffer::dev", "{}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "dev-log"))]
macro_rules! debug_error {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Warning logging macro.
#[macro_export]
#[cfg(feature = "dev-log")]
macro_rules! debug_warn {
    ($($arg:tt)*) => {
        $crate::tracing::warn!(target: "sniffer::dev", "{}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "dev-log"))]
macro_rules! debug_warn {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Verbose trace logging, one line per frame or node.
#[macro_export]
#[cfg(feature = "dev-log")]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        $crate::tracing::trace!(target: "sniffer::dev", "{}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "dev-log"))]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}
