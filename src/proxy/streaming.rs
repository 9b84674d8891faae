//! Event-stream relay for streamed chat completions
//!
//! The upstream body is relayed to the client line by line, unmodified, with
//! a flush after every line. Each line is also inspected for `data:` frames
//! so the model name and usage summary can be recovered on the way through.

use crate::domain::{StreamChunk, Usage};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Prefix of an event-stream data field
pub const DATA_PREFIX: &[u8] = b"data:";

/// Payload that ends a streamed completion
pub const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Whether the relay should keep reading after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Done,
}

/// Telemetry accumulated while relaying a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTelemetry {
    model: Option<String>,
    usage: Option<Usage>,
}

impl StreamTelemetry {
    /// Inspect one raw line. Chunks that fail to decode are ignored.
    pub fn observe_line(&mut self, line: &[u8]) -> LineOutcome {
        let Some(payload) = line.trim_ascii().strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Continue;
        };
        let payload = payload.trim_ascii();

        if payload == DONE_SENTINEL {
            return LineOutcome::Done;
        }

        if payload.first() == Some(&b'{') {
            if let Some(chunk) = StreamChunk::decode(payload) {
                self.observe_chunk(chunk);
            }
        }
        LineOutcome::Continue
    }

    fn observe_chunk(&mut self, chunk: StreamChunk) {
        if !chunk.model.is_empty() {
            self.model = Some(chunk.model);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    /// Last non-empty model seen
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Last usage summary seen
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

/// Relay an event stream from `upstream` to `client`.
///
/// Returns `Ok(())` on the `[DONE]` sentinel or at end of stream, and the
/// first read or write error otherwise. Whatever was observed before an
/// error stays in `telemetry`.
pub async fn relay_event_stream<R, W>(
    upstream: &mut R,
    client: &mut W,
    telemetry: &mut StreamTelemetry,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(1024);

    loop {
        line.clear();
        // A trailing line without a terminator is returned as-is before EOF
        if upstream.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }

        client.write_all(&line).await?;
        client.flush().await?;

        if telemetry.observe_line(&line) == LineOutcome::Done {
            return Ok(());
        }
    }
}
