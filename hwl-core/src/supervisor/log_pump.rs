//! Log pump task
//!
//! Drains the core's merged stdout/stderr, reassembles it into lines and
//! publishes each one to the log stream.

use crate::supervisor::log_stream::{LogLine, LogStream};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bytes requested per read call
const READ_CHUNK: usize = 4096;

/// Splits a byte stream into newline-terminated lines
///
/// Partial lines are carried across `push` calls; whatever is left when the
/// stream ends comes out of `finish`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(decode_line(&self.pending));
            self.pending.clear();
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);

        lines
    }

    /// Flush undelivered trailing bytes as a final line
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode_line(&self.pending))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Run the pump in the background until the stream ends
pub fn spawn<R>(reader: R, logs: LogStream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(pump(reader, logs))
}

/// Read until end-of-stream or a read error, publishing lines as they complete
///
/// A read error ends the pump only; it says nothing about the core itself.
pub async fn pump<R>(mut reader: R, logs: LogStream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut assembler = LineAssembler::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.push(&buf[..n]) {
                    logs.publish(LogLine::Core(line));
                }
            }
            Err(e) => {
                warn!("Failed to read core output, log pump stopping: {}", e);
                break;
            }
        }
    }

    if let Some(line) = assembler.finish() {
        logs.publish(LogLine::Core(line));
    }
    debug!("Core output stream ended");
}
