pub use crate::{Frame, FrameError, FrameKind, FrameReader, HeaderField, ReaderSettings};
pub use crate::{Http1Message, Http1Start};
pub use crate::is_http2_preface;
