//! Kill-on-exit guarantee for the core process
//!
//! Every core is made the leader of its own process group before it execs, so
//! the whole tree it spawns can be signalled at once. On Linux the kernel is
//! additionally asked to SIGKILL the core when the supervisor dies, which
//! covers abrupt termination (SIGKILL, crash) where no destructor runs. For
//! orderly teardown, dropping the last handle kills every group still
//! enrolled.

use crate::error::SupervisorError;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Command;
use tracing::{debug, warn};

/// Process groups whose lifetime is bound to this supervisor
///
/// Created once per supervisor and shared by clone with the background
/// tasks. The guarantee ends when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
    owner: libc::pid_t,
    members: Mutex<HashSet<u32>>,
}

impl ResourceGroup {
    pub fn new() -> Self {
        let owner = unistd::getpid().as_raw();
        debug!(owner, "Resource group created");

        Self {
            inner: Arc::new(GroupInner {
                owner,
                members: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Arrange for a command's process to join the group when it starts
    ///
    /// With `detach_session` the core also leaves the controlling terminal,
    /// which is how a hidden console is expressed on Unix.
    ///
    /// Linux delivers the death signal when the spawning *thread* exits, so
    /// the command must be spawned from a thread that lives as long as the
    /// supervisor (a runtime worker or the main thread, never a blocking-pool
    /// thread).
    pub fn prepare(&self, cmd: &mut Command, detach_session: bool) {
        let owner = self.inner.owner;

        // SAFETY: the closure runs between fork and exec and only makes
        // async-signal-safe libc calls without allocating.
        unsafe {
            cmd.pre_exec(move || {
                let rc = if detach_session {
                    libc::setsid()
                } else {
                    libc::setpgid(0, 0)
                };
                if rc == -1 {
                    return Err(io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    // Owner died before the death signal was armed
                    if libc::getppid() != owner {
                        return Err(io::Error::from_raw_os_error(libc::ESRCH));
                    }
                }
                #[cfg(not(target_os = "linux"))]
                let _ = owner;

                Ok(())
            });
        }
    }

    /// Confirm a freshly spawned process leads its own group and record it
    pub fn enroll(&self, pid: u32) -> Result<(), SupervisorError> {
        let target = Pid::from_raw(pid as i32);
        let pgid = unistd::getpgid(Some(target)).map_err(|e| SupervisorError::EnrollmentFailed {
            pid,
            reason: format!("getpgid failed: {}", e),
        })?;

        if pgid != target {
            return Err(SupervisorError::EnrollmentFailed {
                pid,
                reason: format!("process is in group {} instead of its own", pgid),
            });
        }

        self.members().insert(pid);
        debug!(pid, "Core enrolled in resource group");
        Ok(())
    }

    /// Signal every process in an enrolled member's group
    ///
    /// Pids that are not enrolled are skipped: once released, the pid may
    /// already belong to an unrelated process. A group that no longer
    /// exists counts as success.
    pub fn signal(&self, pid: u32, sig: Signal) -> nix::Result<()> {
        // Held across the kill so a concurrent release cannot interleave
        let members = self.members();
        if !members.contains(&pid) {
            debug!(pid, signal = ?sig, "Not an enrolled core, signal skipped");
            return Ok(());
        }

        match signal::killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) => {
                debug!(pid, signal = ?sig, "Signalled core process group");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Forget a member whose process has been reaped
    pub fn release(&self, pid: u32) {
        if self.members().remove(&pid) {
            debug!(pid, "Core released from resource group");
        }
    }

    /// PIDs of the currently enrolled cores
    pub fn enrolled(&self) -> Vec<u32> {
        self.members().iter().copied().collect()
    }

    fn members(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.inner.members()
    }
}

impl Default for ResourceGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupInner {
    fn members(&self) -> MutexGuard<'_, HashSet<u32>> {
        // The set stays consistent even if a holder panicked
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        for pid in self.members().drain() {
            match signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => debug!(pid, "Killed core process group on teardown"),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, "Failed to kill core process group on teardown: {}", e),
            }
        }
    }
}
