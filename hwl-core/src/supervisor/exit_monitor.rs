//! Exit monitor task
//!
//! Waits for whichever comes first: the core exiting or the stop signal.
//! An exit that nobody asked for is reported exactly once; a requested stop
//! hands the still-live child back to the caller for teardown.

use crate::supervisor::event::{ExitInfo, SupervisorEvent};
use crate::supervisor::log_stream::LogStream;
use crate::supervisor::resource_group::ResourceGroup;
use crate::supervisor::state::{RunState, SharedRunState, StopWaiter};
use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the monitor needs for one run
pub struct ExitMonitor {
    pub child: Child,
    pub pid: u32,
    pub stop: StopWaiter,
    pub state: SharedRunState,
    pub group: ResourceGroup,
    pub events: mpsc::UnboundedSender<SupervisorEvent>,
    pub logs: LogStream,
}

impl ExitMonitor {
    /// Run the monitor in the background
    ///
    /// The task yields the child back if the stop signal won, or `None` once
    /// the child has exited and been released.
    pub fn spawn(self) -> JoinHandle<Option<Child>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Option<Child> {
        let status = tokio::select! {
            biased;
            _ = self.stop.raised() => {
                debug!(pid = self.pid, "Stop requested, exit monitor handing core back");
                return Some(self.child);
            }
            status = self.child.wait() => status,
        };

        let exit = match status {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                warn!(pid = self.pid, "Failed to collect core exit status: {}", e);
                ExitInfo::default()
            }
        };

        // Exit raced with a stop request: the stop path owns teardown.
        // A failed transition to Idle with the state already Idle means
        // is_running saw the exit first, which still gets reported here.
        if self.stop.is_raised()
            || (!self.state.transition(RunState::Running, RunState::Idle)
                && self.state.get() == RunState::Stopping)
        {
            debug!(pid = self.pid, %exit, "Core exited while stopping");
            return None;
        }

        // Helpers the core left behind would keep its output pipe open
        if let Err(e) = self.group.signal(self.pid, Signal::SIGKILL) {
            warn!(pid = self.pid, "Failed to kill leftover core processes: {}", e);
        }
        self.group.release(self.pid);
        drop(self.child);

        if exit.success() {
            info!(pid = self.pid, %exit, "Core exited on its own");
        } else {
            warn!(pid = self.pid, %exit, "Core terminated unexpectedly");
        }
        self.logs.status(format!("⚠️ VPN core terminated ({})", exit));
        let _ = self.events.send(SupervisorEvent::Terminated {
            pid: self.pid,
            exit,
        });
        None
    }
}
