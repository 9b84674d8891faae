//! Append-only event log with a single writer

use crate::domain::MeteringEvent;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Buffer in front of the log file
const FILE_BUFFER_BYTES: usize = 1 << 20;

enum Destination {
    Writer(Box<dyn Write + Send>),
    Tracing,
}

/// Durable log of ingested events, one JSON document per line
///
/// Appends are serialized by a mutex and flushed before returning, so a
/// line is either fully written or not at all from a reader's point of view.
pub struct EventLog {
    destination: Mutex<Destination>,
}

impl EventLog {
    /// Log to `path` when given, otherwise through tracing
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => Self::to_file(path),
            None => {
                info!("EVENT_LOG_PATH not set; events will be written to the log");
                Ok(Self::to_tracing())
            }
        }
    }

    /// Append to `path`, creating it if needed
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Writing events to file");
        Ok(Self::to_writer(BufWriter::with_capacity(FILE_BUFFER_BYTES, file)))
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            destination: Mutex::new(Destination::Writer(Box::new(writer))),
        }
    }

    pub fn to_tracing() -> Self {
        Self {
            destination: Mutex::new(Destination::Tracing),
        }
    }

    pub fn append(&self, event: &MeteringEvent) -> io::Result<()> {
        let line = serde_json::to_vec(event)?;

        let mut destination = self.destination.lock();
        match &mut *destination {
            Destination::Writer(writer) => {
                writer.write_all(&line)?;
                writer.write_all(b"\n")?;
                writer.flush()
            }
            Destination::Tracing => {
                info!("EVENT {}", String::from_utf8_lossy(&line));
                Ok(())
            }
        }
    }

    /// Flush anything still buffered
    pub fn close(&self) -> io::Result<()> {
        match &mut *self.destination.lock() {
            Destination::Writer(writer) => writer.flush(),
            Destination::Tracing => Ok(()),
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to flush event log");
        }
    }
}
