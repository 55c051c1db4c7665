use std::time::Duration;

use crate::frame::MAX_FRAME_LEN;

/// Limits applied by a [`FrameReader`](crate::FrameReader).
///
/// The reader never negotiates anything, so these are local safety bounds rather
/// than HTTP/2 settings.
#[derive(Clone, Debug)]
pub struct ReaderSettings {
    /// Frames with a longer payload are skipped.
    pub max_frame_size: u32,
    /// Upper bound for the HPACK dynamic table.
    pub header_table_size: usize,
    /// Upper bound for a decoded header list (name + value + 32 per field).
    pub max_header_list_size: usize,
    /// Upper bound for an HTTP/1 request or response head.
    pub max_http1_head: usize,
    /// End the stream after this long without a single byte.
    pub idle_timeout: Option<Duration>,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_LEN,
            header_table_size: 4096,
            max_header_list_size: 16 << 20,
            max_http1_head: 64 << 10,
            idle_timeout: None,
        }
    }
}

impl ReaderSettings {
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size.min(MAX_FRAME_LEN);
        self
    }

    pub fn header_table_size(mut self, size: usize) -> Self {
        self.header_table_size = size;
        self
    }

    pub fn max_header_list_size(mut self, size: usize) -> Self {
        self.max_header_list_size = size;
        self
    }

    pub fn max_http1_head(mut self, size: usize) -> Self {
        self.max_http1_head = size;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}
