//! Bounded capture of a response body prefix
//!
//! Buffered (non-streaming) responses are copied to the client as they
//! arrive. A copy of the first few bytes is kept here so usage can be parsed
//! once the body is done, without holding the whole body in memory.

use crate::config::CaptureLimit;
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the up-front allocation for a capture buffer
const INITIAL_CAPTURE_ALLOCATION: usize = 16 * 1024;

/// Write sink that keeps at most `limit` bytes and silently drops the rest
///
/// Writes never fail and always report the full input length, so the sink
/// can sit behind a tee without ever slowing or aborting the primary copy.
#[derive(Debug)]
pub struct BoundedCapture {
    limit: usize,
    buf: Vec<u8>,
}

impl BoundedCapture {
    pub fn new(limit: CaptureLimit) -> Self {
        Self::with_limit(*limit.as_ref())
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::with_capacity(limit.min(INITIAL_CAPTURE_ALLOCATION)),
        }
    }

    /// Accept `data`, keeping only what still fits under the limit
    pub fn capture(&mut self, data: &[u8]) -> usize {
        let remaining = self.limit.saturating_sub(self.buf.len());
        let kept = data.len().min(remaining);
        self.buf.extend_from_slice(&data[..kept]);
        data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Write for BoundedCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok(self.capture(data))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copy `upstream` to `client` chunk by chunk, teeing into `capture`
///
/// The client is flushed after every chunk. Reading continues to the end of
/// the upstream body after the capture fills up, so the upstream connection
/// is left reusable. A client write failure aborts the copy.
pub async fn copy_with_capture<R, W>(
    upstream: &mut R,
    client: &mut W,
    capture: &mut BoundedCapture,
) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut copied = 0u64;

    loop {
        let chunk = upstream.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(copied);
        }

        capture.capture(chunk);
        client.write_all(chunk).await?;
        client.flush().await?;

        let len = chunk.len();
        copied += len as u64;
        upstream.consume(len);
    }
}
