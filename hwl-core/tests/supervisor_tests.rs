//! Integration tests for the core supervisor
//!
//! A `/bin/sh` script stands in for the VPN core so every test runs a real
//! process through real pipes.

use hwl_core::config::SupervisorConfig;
use hwl_core::error::{ConfigError, HwlError, SupervisorError};
use hwl_core::supervisor::{
    LogLine, LogSubscription, RunState, StartOutcome, Supervisor, SupervisorEvent,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn shell_core(script: &str) -> SupervisorConfig {
    SupervisorConfig {
        stop_grace_ms: 500,
        drain_timeout_ms: 2000,
        ..SupervisorConfig::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }
}

fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Collect core lines until `done` says enough or the stream ends
async fn core_lines_until(
    subscription: &mut LogSubscription,
    done: impl Fn(&[String]) -> bool,
) -> Vec<String> {
    let mut lines = Vec::new();
    while !done(&lines) {
        match timeout(WAIT, subscription.recv()).await {
            Ok(Some(LogLine::Core(line))) => lines.push(line),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    lines
}

async fn next_event(events: &mut UnboundedReceiver<SupervisorEvent>) -> SupervisorEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for supervisor event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_config_payload_delivered_exactly_then_eof() {
    // Given: a core that echoes stdin and marks where its input ended
    let (mut supervisor, _events) =
        Supervisor::new(shell_core("cat; printf '|EOF\\n'; sleep 30")).unwrap();
    let mut logs = supervisor.subscribe_logs();

    // When: starting with a payload lacking a trailing newline
    supervisor.start("listen=1234\nmode=tun", true).await.unwrap();
    let lines = core_lines_until(&mut logs, |lines| lines.len() >= 2).await;

    // Then: the core saw exactly those bytes followed by EOF
    assert_eq!(lines, vec!["listen=1234", "mode=tun|EOF"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_second_start_while_running_spawns_nothing() {
    // Given: a running core
    let (mut supervisor, mut events) = Supervisor::new(shell_core("sleep 30")).unwrap();
    let first = supervisor.start("{}", true).await.unwrap();
    assert!(matches!(first, StartOutcome::Started { .. }));
    assert_eq!(next_event(&mut events).await, SupervisorEvent::ProcessStarted { pid: first.pid() });

    // When: starting again
    let second = supervisor.start("{}", true).await.unwrap();

    // Then: the same process is reported and no other was created
    assert_eq!(second, StartOutcome::AlreadyRunning { pid: first.pid() });
    assert_eq!(supervisor.enrolled_pids(), vec![first.pid()]);
    assert!(events.try_recv().is_err());

    supervisor.stop().await;
}

#[tokio::test]
async fn test_stop_tears_everything_down() {
    // Given: a running core
    let (mut supervisor, mut events) = Supervisor::new(shell_core("sleep 30")).unwrap();
    let pid = supervisor.start("{}", false).await.unwrap().pid();
    assert!(supervisor.is_running());
    next_event(&mut events).await;

    // When: stopping
    supervisor.stop().await;

    // Then: state, process, group membership and tasks are all gone
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.state(), RunState::Idle);
    assert_eq!(supervisor.pid(), None);
    assert!(supervisor.enrolled_pids().is_empty());
    assert!(!process_exists(pid));
    assert_eq!(next_event(&mut events).await, SupervisorEvent::Stopped { pid });
}

#[tokio::test]
async fn test_stop_escalates_when_core_ignores_sigterm() {
    // Given: a core that traps SIGTERM
    let (mut supervisor, _events) =
        Supervisor::new(shell_core("trap '' TERM; while true; do sleep 1; done")).unwrap();
    let pid = supervisor.start("{}", true).await.unwrap().pid();

    // When: stopping
    supervisor.stop().await;

    // Then: it was killed after the grace period
    assert!(!process_exists(pid));
    assert_eq!(supervisor.state(), RunState::Idle);
}

#[tokio::test]
async fn test_crash_is_reported_once_without_stop() {
    // Given: a core that fails after reading its configuration
    let (mut supervisor, mut events) =
        Supervisor::new(shell_core("cat > /dev/null; exit 1")).unwrap();
    let pid = supervisor.start("log_level=debug", true).await.unwrap().pid();
    assert_eq!(next_event(&mut events).await, SupervisorEvent::ProcessStarted { pid });

    // When: the core exits on its own
    let event = next_event(&mut events).await;

    // Then: exactly one termination notification arrives
    match event {
        SupervisorEvent::Terminated { pid: exited, exit } => {
            assert_eq!(exited, pid);
            assert_eq!(exit.code, Some(1));
        }
        other => panic!("Expected Terminated event, got {:?}", other),
    }
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.state(), RunState::Idle);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());

    // And: stop afterwards is a no-op
    supervisor.stop().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_external_kill_then_stop_is_noop() {
    // Given: a running core
    let (mut supervisor, mut events) =
        Supervisor::new(shell_core("cat > /dev/null; sleep 30")).unwrap();
    let outcome = supervisor.start("listen=1234", true).await.unwrap();
    let pid = outcome.pid();
    next_event(&mut events).await;

    // When: something else kills it
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    // Then: the termination is observed and the supervisor is idle
    match next_event(&mut events).await {
        SupervisorEvent::Terminated { exit, .. } => {
            assert_eq!(exit.signal, Some(Signal::SIGKILL as i32))
        }
        other => panic!("Expected Terminated event, got {:?}", other),
    }
    assert!(!supervisor.is_running());

    supervisor.stop().await;
    assert_eq!(supervisor.state(), RunState::Idle);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_is_running_notices_exit() {
    // Given: a core that exits as soon as its input ends
    let (mut supervisor, _events) = Supervisor::new(shell_core("cat > /dev/null")).unwrap();
    supervisor.start("{}", true).await.unwrap();

    // When/Then: is_running turns false without any stop
    let became_idle = timeout(WAIT, async {
        while supervisor.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(became_idle.is_ok());
    assert_eq!(supervisor.state(), RunState::Idle);
}

#[tokio::test]
async fn test_restart_after_stop_launches_new_core() {
    let (mut supervisor, _events) = Supervisor::new(shell_core("sleep 30")).unwrap();

    let first = supervisor.start("{}", true).await.unwrap().pid();
    supervisor.stop().await;
    let second = supervisor.start("{}", true).await.unwrap();

    assert!(matches!(second, StartOutcome::Started { .. }));
    assert_ne!(second.pid(), first);
    assert!(supervisor.is_running());

    supervisor.stop().await;
}

#[tokio::test]
async fn test_restart_after_crash_launches_new_core() {
    let (mut supervisor, mut events) =
        Supervisor::new(shell_core("cat > /dev/null; exit 3")).unwrap();

    supervisor.start("{}", true).await.unwrap();
    next_event(&mut events).await;
    assert!(matches!(next_event(&mut events).await, SupervisorEvent::Terminated { .. }));

    let second = supervisor.start("{}", true).await.unwrap();
    assert!(matches!(second, StartOutcome::Started { .. }));

    supervisor.stop().await;
}

#[tokio::test]
async fn test_stdout_and_stderr_are_merged() {
    let (mut supervisor, _events) =
        Supervisor::new(shell_core("echo to-stdout; echo to-stderr >&2; sleep 30")).unwrap();
    let mut logs = supervisor.subscribe_logs();

    supervisor.start("{}", true).await.unwrap();
    let lines = core_lines_until(&mut logs, |lines| lines.len() >= 2).await;

    assert_eq!(lines, vec!["to-stdout", "to-stderr"]);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_log_stream_starts_with_reset_and_status() {
    let (mut supervisor, _events) = Supervisor::new(shell_core("sleep 30")).unwrap();
    let mut logs = supervisor.subscribe_logs();

    supervisor.start("{}", true).await.unwrap();

    assert_eq!(logs.recv().await, Some(LogLine::Reset));
    assert_eq!(
        logs.recv().await,
        Some(LogLine::Status("🚀 Starting VPN core...".to_string()))
    );
    supervisor.stop().await;
}

#[tokio::test]
async fn test_missing_core_is_launch_error() {
    // Given: a core expected beside the test binary that does not exist
    let config = SupervisorConfig::new("hwl-missing-core", vec![]);
    let (mut supervisor, mut events) = Supervisor::new(config).unwrap();

    // When: starting
    let result = supervisor.start("{}", true).await;

    // Then: launch fails and nothing is left behind
    assert!(matches!(result, Err(SupervisorError::LaunchFailed { .. })));
    assert_eq!(supervisor.state(), RunState::Idle);
    assert!(!supervisor.is_running());
    assert!(supervisor.enrolled_pids().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_config_write_failure_rolls_back() {
    // Given: a core that closes stdin without reading it
    let (mut supervisor, _events) =
        Supervisor::new(shell_core("exec 0<&-; sleep 30")).unwrap();
    let payload = "x".repeat(4 * 1024 * 1024);

    // When: the payload cannot fit in the pipe buffer
    let result = supervisor.start(&payload, true).await;

    // Then: start fails and the core is gone
    assert!(matches!(result, Err(SupervisorError::WriteFailed { .. })));
    assert_eq!(supervisor.state(), RunState::Idle);
    assert!(supervisor.enrolled_pids().is_empty());
}

#[tokio::test]
async fn test_drop_kills_running_core() {
    let (mut supervisor, _events) = Supervisor::new(shell_core("sleep 30")).unwrap();
    let pid = supervisor.start("{}", true).await.unwrap().pid();

    drop(supervisor);

    let gone = timeout(WAIT, async {
        while process_exists(pid) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "core should not outlive its supervisor");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_started_is_reported_before_immediate_exit() {
    for _ in 0..20 {
        // Given: a core that exits as soon as its input ends
        let (mut supervisor, mut events) =
            Supervisor::new(shell_core("cat > /dev/null; exit 1")).unwrap();
        let mut logs = supervisor.subscribe_logs();

        // When: starting it on a multi-threaded runtime
        let pid = supervisor.start("{}", true).await.unwrap().pid();

        // Then: the start is announced before the termination
        assert_eq!(next_event(&mut events).await, SupervisorEvent::ProcessStarted { pid });
        assert!(matches!(
            next_event(&mut events).await,
            SupervisorEvent::Terminated { .. }
        ));

        // And: the status lines follow the same order
        let mut statuses = Vec::new();
        while !statuses.iter().any(|s: &String| s.contains("terminated")) {
            match timeout(WAIT, logs.recv()).await {
                Ok(Some(LogLine::Status(status))) => statuses.push(status),
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        let started = statuses.iter().position(|s| s.contains("started successfully"));
        let terminated = statuses.iter().position(|s| s.contains("terminated"));
        assert!(started.is_some() && terminated.is_some());
        assert!(started < terminated, "status order was {:?}", statuses);

        supervisor.stop().await;
    }
}

#[tokio::test]
async fn test_drop_after_crash_leaves_released_pid_alone() {
    // Given: a core that crashed and was already collected by the monitor
    let (mut supervisor, mut events) =
        Supervisor::new(shell_core("cat > /dev/null; exit 1")).unwrap();
    let pid = supervisor.start("{}", true).await.unwrap().pid();
    next_event(&mut events).await;
    assert!(matches!(
        next_event(&mut events).await,
        SupervisorEvent::Terminated { .. }
    ));

    // Then: its pid is no longer enrolled, so teardown has nothing to signal
    assert!(supervisor.enrolled_pids().is_empty());
    assert_eq!(supervisor.pid(), Some(pid));

    // When: dropping without stop
    drop(supervisor);

    // Then: no further lifecycle events are produced
    assert!(matches!(timeout(WAIT, events.recv()).await, Ok(None)));
}

#[test]
fn test_oversized_log_buffer_is_rejected() {
    let config = SupervisorConfig {
        log_buffer_capacity: usize::MAX,
        ..SupervisorConfig::default()
    };

    let result = Supervisor::new(config);

    assert!(matches!(
        result,
        Err(HwlError::Config(ConfigError::ValidationError { .. }))
    ));
}
