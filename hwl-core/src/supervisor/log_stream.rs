//! Log stream between the log pump and its observers
//!
//! Lines are owned values moved through a bounded broadcast queue. A slow
//! observer never stalls the pump: once it falls `capacity` lines behind, its
//! oldest undelivered lines are discarded.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Sentinel telling an observer to discard everything shown so far
pub const CLEAR_LOGS_MARKER: &str = "__CLEAR_LOGS__";

/// Visual tag prefixed to every line produced by the core
pub const CORE_LINE_TAG: &str = "📦 ";

/// One entry of the log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    /// Stream reset; always the first entry a subscription yields
    Reset,

    /// A line of core stdout/stderr output, without its newline
    Core(String),

    /// A lifecycle message from the supervisor itself
    Status(String),
}

impl LogLine {
    /// Text as presented to the observer, without trailing newline
    pub fn render(&self) -> String {
        match self {
            LogLine::Reset => CLEAR_LOGS_MARKER.to_string(),
            LogLine::Core(text) => format!("{}{}", CORE_LINE_TAG, text),
            LogLine::Status(text) => text.clone(),
        }
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Publishing side of the log stream
#[derive(Debug, Clone)]
pub struct LogStream {
    sender: broadcast::Sender<LogLine>,
}

impl LogStream {
    /// Create a stream buffering up to `capacity` lines per subscriber
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; `SupervisorConfig::validate` rejects that.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a line without waiting on any observer
    pub fn publish(&self, line: LogLine) {
        // No subscriber is not an error: lines are simply not retained
        let _ = self.sender.send(line);
    }

    pub fn status(&self, text: impl Into<String>) {
        self.publish(LogLine::Status(text.into()));
    }

    /// Attach a new observer
    pub fn subscribe(&self) -> LogSubscription {
        LogSubscription {
            receiver: self.sender.subscribe(),
            reset_pending: true,
        }
    }
}

/// Observer side of the log stream
#[derive(Debug)]
pub struct LogSubscription {
    receiver: broadcast::Receiver<LogLine>,
    reset_pending: bool,
}

impl LogSubscription {
    /// Next line, or `None` once every publisher is gone
    ///
    /// The first call always yields [`LogLine::Reset`].
    pub async fn recv(&mut self) -> Option<LogLine> {
        if self.reset_pending {
            self.reset_pending = false;
            return Some(LogLine::Reset);
        }

        loop {
            match self.receiver.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Log observer fell behind, dropped oldest lines");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
