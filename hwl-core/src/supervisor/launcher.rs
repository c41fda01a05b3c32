//! Core process launch
//!
//! Spawns the core with piped stdio inside the resource group, hands it the
//! configuration payload on stdin and closes stdin so the core sees EOF.

use crate::error::SupervisorError;
use crate::supervisor::pipes::StdioPipes;
use crate::supervisor::resource_group::ResourceGroup;
use nix::sys::signal::Signal;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// What to run and how
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub executable: &'a Path,
    pub args: &'a [String],
    pub working_dir: &'a Path,
    /// Start the core detached from the controlling terminal
    pub hide_window: bool,
}

/// A core that is running, enrolled and has received its configuration
#[derive(Debug)]
pub struct LaunchedCore {
    pub child: Child,
    pub pid: u32,
    /// Read end of the merged stdout/stderr pipe
    pub output: pipe::Receiver,
}

/// Launch the core and deliver its configuration
///
/// On any failure everything created so far is torn down: the process is
/// killed and reaped and every pipe end is closed.
pub async fn launch(
    request: LaunchRequest<'_>,
    group: &ResourceGroup,
    payload: &[u8],
) -> Result<LaunchedCore, SupervisorError> {
    let (child_ends, parent_ends) = StdioPipes::create()?.split();

    let stdin_writer = pipe::Sender::from_file(File::from(parent_ends.stdin)).map_err(|e| {
        SupervisorError::PipeCreationFailed {
            reason: format!("stdin writer: {}", e),
        }
    })?;
    let output = pipe::Receiver::from_file(File::from(parent_ends.output)).map_err(|e| {
        SupervisorError::PipeCreationFailed {
            reason: format!("output reader: {}", e),
        }
    })?;
    let stderr_end = child_ends.output.try_clone().map_err(|e| {
        SupervisorError::PipeCreationFailed {
            reason: format!("stderr duplicate: {}", e),
        }
    })?;

    let mut cmd = Command::new(request.executable);
    cmd.args(request.args)
        .current_dir(request.working_dir)
        .stdin(Stdio::from(child_ends.stdin))
        .stdout(Stdio::from(child_ends.output))
        .stderr(Stdio::from(stderr_end))
        .kill_on_drop(true);
    group.prepare(&mut cmd, request.hide_window);

    let spawned = cmd.spawn();
    // Closes the supervisor's copies of the core's stdin read end and output write end
    drop(cmd);

    let mut child = spawned.map_err(|e| SupervisorError::LaunchFailed {
        path: request.executable.display().to_string(),
        reason: e.to_string(),
    })?;
    let pid = child.id().ok_or_else(|| SupervisorError::LaunchFailed {
        path: request.executable.display().to_string(),
        reason: "process exited before its id was read".to_string(),
    })?;
    debug!(pid, executable = %request.executable.display(), "Core process spawned");

    enroll_or_abort(&mut child, pid, group).await?;

    if let Err(e) = write_payload(stdin_writer, payload).await {
        warn!(pid, "Configuration delivery failed, killing core: {}", e);
        abort_child(&mut child, pid, group).await;
        return Err(SupervisorError::WriteFailed {
            reason: e.to_string(),
        });
    }

    info!(pid, bytes = payload.len(), "Core launched and configured");
    Ok(LaunchedCore { child, pid, output })
}

/// Write the whole payload, then close stdin so the core reads EOF
async fn write_payload(mut writer: pipe::Sender, payload: &[u8]) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await?;
    drop(writer);
    Ok(())
}

/// Enroll a spawned core, killing and reaping it if that fails
async fn enroll_or_abort(
    child: &mut Child,
    pid: u32,
    group: &ResourceGroup,
) -> Result<(), SupervisorError> {
    if let Err(e) = group.enroll(pid) {
        warn!(pid, "Resource group enrollment failed, killing core: {}", e);
        abort_child(child, pid, group).await;
        return Err(e);
    }
    Ok(())
}

async fn abort_child(child: &mut Child, pid: u32, group: &ResourceGroup) {
    if let Err(e) = group.signal(pid, Signal::SIGKILL) {
        warn!(pid, "Failed to kill core process group: {}", e);
    }
    if let Err(e) = child.kill().await {
        warn!(pid, "Failed to reap core process: {}", e);
    }
    group.release(pid);
}

/// Non-destructive check whether a child process has already exited
///
/// Leaves the exit status in place for whoever owns the `Child` to collect.
#[cfg(target_os = "linux")]
pub fn has_exited(pid: u32) -> bool {
    // SAFETY: a zeroed siginfo_t is a valid out-parameter for waitid
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: info outlives the call; WNOWAIT keeps the child waitable
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc == -1 {
        // ECHILD: already reaped, so certainly gone
        return true;
    }
    // SAFETY: waitid returned successfully and filled in the structure
    unsafe { info.si_pid() != 0 }
}

#[cfg(not(target_os = "linux"))]
pub fn has_exited(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_enrollment_kills_and_reaps_core() {
        // Given: a process spawned without its own process group
        let group = ResourceGroup::new();
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        // When: enrolling it
        let result = enroll_or_abort(&mut child, pid, &group).await;

        // Then: enrollment fails, the process is reaped and no member is left
        assert!(matches!(result, Err(SupervisorError::EnrollmentFailed { .. })));
        assert!(child.try_wait().unwrap().is_some());
        assert!(group.enrolled().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_has_exited_tracks_child_without_reaping() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();

        let exited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !has_exited(pid) {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(exited.is_ok());
        // Status is still there for the owner
        assert!(child.wait().await.unwrap().success());
    }
}
