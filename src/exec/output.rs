// src/exec/output.rs

//! Size-bounded capture of child process output.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Default per-stream capture limit (64 KiB).
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Accumulates bytes up to `limit`; everything past the limit is counted and
/// dropped.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        let take = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);
        self.dropped += (chunk.len() - take) as u64;
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Number of bytes that did not fit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Lossy UTF-8 rendering, with a marker appended when bytes were dropped.
    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[... truncated {} bytes]", self.dropped));
        }
        text
    }
}

/// Drain `reader` to EOF into a [`BoundedBuffer`].
///
/// The reader is always consumed fully so the child never blocks on a full
/// pipe, even when the captured text is already at its limit.
pub async fn capture<R>(mut reader: R, limit: usize) -> BoundedBuffer
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BoundedBuffer::new(limit);
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "output stream read failed; keeping what was captured");
                break;
            }
        }
    }

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_the_limit() {
        let mut buf = BoundedBuffer::new(16);
        buf.push(b"hello ");
        buf.push(b"world");

        assert!(!buf.is_truncated());
        assert_eq!(buf.into_string(), "hello world");
    }

    #[test]
    fn truncates_with_marker() {
        let mut buf = BoundedBuffer::new(4);
        buf.push(b"abcdef");
        buf.push(b"gh");

        assert_eq!(buf.dropped(), 4);
        assert_eq!(buf.into_string(), "abcd\n[... truncated 4 bytes]");
    }

    #[test]
    fn zero_limit_captures_nothing() {
        let mut buf = BoundedBuffer::new(0);
        buf.push(b"xyz");

        assert_eq!(buf.into_string(), "[... truncated 3 bytes]");
    }

    #[tokio::test]
    async fn capture_reads_to_eof() {
        let input: &[u8] = b"line one\nline two\n";
        let buf = capture(input, 8).await;

        assert!(buf.is_truncated());
        assert_eq!(buf.into_string(), "line one\n[... truncated 10 bytes]");
    }
}
