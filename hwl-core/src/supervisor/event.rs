//! Lifecycle events delivered to the supervisor's observer
//!
//! Events are posted to a channel and consumed on whatever context the
//! observer runs on; the supervisor never calls into the observer directly.

use std::process::ExitStatus;

/// Events emitted over the lifetime of the supervised core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Core launched, configured and monitored
    ProcessStarted { pid: u32 },

    /// Core exited on its own while running; delivered at most once per run
    Terminated { pid: u32, exit: ExitInfo },

    /// Caller-initiated teardown finished
    Stopped { pid: u32 },
}

/// How the core process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,

    /// Terminating signal, when the process was killed
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_info_from_code() {
        // Raw wait status: exit code lives in the second byte
        let info = ExitInfo::from(ExitStatus::from_raw(1 << 8));

        assert_eq!(info.code, Some(1));
        assert_eq!(info.signal, None);
        assert!(!info.success());
        assert_eq!(info.to_string(), "exit code 1");
    }

    #[test]
    fn test_exit_info_from_signal() {
        let info = ExitInfo::from(ExitStatus::from_raw(libc::SIGKILL));

        assert_eq!(info.code, None);
        assert_eq!(info.signal, Some(libc::SIGKILL));
        assert_eq!(info.to_string(), "signal 9");
    }
}
