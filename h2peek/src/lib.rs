//! Passive HTTP/2 frame reader.
//!
//! `h2peek` reads frames off one direction of a captured connection without ever
//! writing back. It strips the connection preface, decodes header blocks with a
//! per-direction HPACK decoder, assembles CONTINUATION frames and steps over
//! plaintext HTTP/1 messages that share the stream.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use h2peek::{Frame, FrameReader};
//!
//! let captured: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n\0\0\0\x04\0\0\0\0\0";
//! let mut reader = FrameReader::new(captured);
//! while let Ok(Some(frame)) = reader.next().await {
//!     if let Frame::Other { kind, .. } = frame {
//!         println!("{}", kind);
//!     }
//! }
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod http1;
pub mod reader;
pub mod settings;
pub mod prelude;

pub use error::FrameError;
pub use frame::{CONNECTION_PREFACE, Frame, FrameHeader, FrameKind, HeaderField};
pub use http1::{Http1Message, Http1Start};
pub use reader::{FrameReader, collect_frames};
pub use settings::ReaderSettings;

/// Whether a captured stream opens with the HTTP/2 client preface.
pub fn is_http2_preface(initial_bytes: &[u8]) -> bool {
    initial_bytes.starts_with(CONNECTION_PREFACE)
}
