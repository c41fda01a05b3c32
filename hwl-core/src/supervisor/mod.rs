//! VPN core supervision
//!
//! Owns the one core process the application runs: launches it with its
//! configuration on stdin, streams its output, reports unexpected exits and
//! tears it down in a fixed order.

pub mod event;
pub mod exit_monitor;
pub mod launcher;
pub mod log_pump;
pub mod log_stream;
pub mod pipes;
pub mod resource_group;
pub mod state;

// Public re-exports
pub use event::{ExitInfo, SupervisorEvent};
pub use log_stream::{LogLine, LogStream, LogSubscription};
pub use resource_group::ResourceGroup;
pub use state::{RunState, SharedRunState, StopSignal};

use crate::config::SupervisorConfig;
use crate::error::{ConfigError, HwlError, SupervisorError};
use exit_monitor::ExitMonitor;
use launcher::{LaunchRequest, LaunchedCore};
use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new core process was launched
    Started { pid: u32 },

    /// A core was already running; nothing was spawned
    AlreadyRunning { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid } | StartOutcome::AlreadyRunning { pid } => *pid,
        }
    }
}

/// Background tasks and identity of the current core
struct ActiveRun {
    pid: u32,
    monitor: JoinHandle<Option<Child>>,
    pump: JoinHandle<()>,
}

/// Supervisor for a single VPN core process
///
/// There is no global instance: whoever creates it owns it and passes it by
/// reference to the code issuing start and stop requests.
pub struct Supervisor {
    config: SupervisorConfig,
    group: ResourceGroup,
    state: SharedRunState,
    stop_signal: StopSignal,
    logs: LogStream,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    run: Option<ActiveRun>,
}

impl Supervisor {
    /// Create a supervisor and the receiver for its lifecycle events
    pub fn new(
        config: SupervisorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SupervisorEvent>), HwlError> {
        config
            .validate()
            .map_err(|e| HwlError::Config(ConfigError::ValidationError { message: e }))?;

        let (events, event_receiver) = mpsc::unbounded_channel();
        let logs = LogStream::new(config.log_buffer_capacity);

        let supervisor = Self {
            config,
            group: ResourceGroup::new(),
            state: SharedRunState::new(),
            stop_signal: StopSignal::new(),
            logs,
            events,
            run: None,
        };
        Ok((supervisor, event_receiver))
    }

    /// Attach an observer to the log stream
    pub fn subscribe_logs(&self) -> LogSubscription {
        self.logs.subscribe()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// PID of the current core, if one has been launched and not yet torn down
    pub fn pid(&self) -> Option<u32> {
        self.run.as_ref().map(|run| run.pid)
    }

    /// PIDs currently bound to the supervisor's lifetime
    pub fn enrolled_pids(&self) -> Vec<u32> {
        self.group.enrolled()
    }

    /// Launch the core with `payload` on its stdin
    ///
    /// Idempotent while running. On failure nothing is left behind and the
    /// state is back to `Idle`.
    pub async fn start(
        &mut self,
        payload: &str,
        hide_window: bool,
    ) -> Result<StartOutcome, SupervisorError> {
        if self.is_running() {
            if let Some(pid) = self.pid() {
                info!(pid, "Core is already running");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
        }

        // Tasks of a run that ended on its own
        self.collect_finished_run().await;

        self.state.set(RunState::Starting);
        self.stop_signal.reset();
        self.logs.status("🚀 Starting VPN core...");

        let core = match self.launch(payload, hide_window).await {
            Ok(core) => core,
            Err(e) => {
                error!("Failed to start core: {}", e);
                self.logs.status(format!("❌ {}", e));
                self.state.set(RunState::Idle);
                return Err(e);
            }
        };

        let LaunchedCore { child, pid, output } = core;
        self.state.set(RunState::Running);
        // Announced before the monitor exists so a core that dies at once is
        // still reported as started first
        let _ = self.events.send(SupervisorEvent::ProcessStarted { pid });
        self.logs.status("✅ VPN core started successfully.");

        let monitor = ExitMonitor {
            child,
            pid,
            stop: self.stop_signal.subscribe(),
            state: self.state.clone(),
            group: self.group.clone(),
            events: self.events.clone(),
            logs: self.logs.clone(),
        }
        .spawn();
        let pump = log_pump::spawn(output, self.logs.clone());
        self.run = Some(ActiveRun { pid, monitor, pump });

        info!(pid, "Core running");
        Ok(StartOutcome::Started { pid })
    }

    async fn launch(&self, payload: &str, hide_window: bool) -> Result<LaunchedCore, SupervisorError> {
        let executable = self.config.core_path().map_err(|e| launch_config_error(&self.config, e))?;
        let working_dir = self
            .config
            .core_working_dir()
            .map_err(|e| launch_config_error(&self.config, e))?;

        let request = LaunchRequest {
            executable: &executable,
            args: &self.config.core_args,
            working_dir: &working_dir,
            hide_window,
        };
        launcher::launch(request, &self.group, payload.as_bytes()).await
    }

    /// Tear the core down
    ///
    /// Returns only after both background tasks have finished and the core
    /// has been reaped. Failures along the way are logged and teardown goes
    /// on; the state always ends `Idle`.
    pub async fn stop(&mut self) {
        if !self.state.transition(RunState::Running, RunState::Stopping) {
            // Nothing running; at most a self-terminated run is left to collect
            self.collect_finished_run().await;
            return;
        }
        let Some(run) = self.run.take() else {
            self.state.set(RunState::Idle);
            return;
        };

        info!(pid = run.pid, "Stopping core");
        self.logs.status("🛑 Stopping VPN core...");
        self.stop_signal.raise();

        let child = match run.monitor.await {
            Ok(child) => child,
            Err(e) => {
                error!(pid = run.pid, "Exit monitor failed: {}", e);
                None
            }
        };
        match child {
            Some(child) => self.terminate(child, run.pid).await,
            None => {
                // Exited on its own while the stop was in flight; the group may still hold helpers
                if let Err(e) = self.group.signal(run.pid, Signal::SIGKILL) {
                    warn!(pid = run.pid, "Failed to kill core process group: {}", e);
                }
            }
        }
        self.group.release(run.pid);

        self.drain_pump(run.pump).await;

        self.state.set(RunState::Idle);
        let _ = self.events.send(SupervisorEvent::Stopped { pid: run.pid });
        self.logs.status("⏹️ VPN core stopped.");
        info!(pid = run.pid, "Core stopped");
    }

    /// Whether the core is alive right now
    ///
    /// Asks the OS rather than trusting the flag alone: a core that exited
    /// before the monitor noticed flips the state to `Idle` here.
    pub fn is_running(&self) -> bool {
        if !self.state.is_running() {
            return false;
        }
        let Some(pid) = self.pid() else {
            return false;
        };

        if launcher::has_exited(pid) {
            if self.state.transition(RunState::Running, RunState::Idle) {
                debug!(pid, "Core found exited before the monitor reported it");
            }
            return false;
        }
        true
    }

    /// Stop the core and release the supervisor
    pub async fn shutdown(mut self) {
        self.stop().await;
    }

    /// SIGTERM the core's group, escalating to SIGKILL after the grace period
    async fn terminate(&self, mut child: Child, pid: u32) {
        if let Err(e) = self.group.signal(pid, Signal::SIGTERM) {
            warn!(pid, "Failed to send SIGTERM to core: {}", e);
        }

        let waited = tokio::time::timeout(self.config.stop_grace(), child.wait()).await;
        match waited {
            Ok(Ok(status)) => debug!(pid, ?status, "Core exited after SIGTERM"),
            Ok(Err(e)) => warn!(pid, "Failed to wait for core: {}", e),
            Err(_) => {
                warn!(pid, "Core ignored SIGTERM, sending SIGKILL");
                if let Err(e) = self.group.signal(pid, Signal::SIGKILL) {
                    warn!(pid, "Failed to send SIGKILL to core: {}", e);
                }
                if let Err(e) = child.kill().await {
                    warn!(pid, "Failed to kill core: {}", e);
                }
            }
        }
    }

    /// Wait for the log pump to reach end-of-stream
    async fn drain_pump(&self, pump: JoinHandle<()>) {
        let abort = pump.abort_handle();
        match tokio::time::timeout(self.config.drain_timeout(), pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Log pump failed: {}", e),
            Err(_) => {
                warn!("Core output still open after stop, abandoning log pump");
                abort.abort();
            }
        }
    }

    /// Join the tasks of a run whose core already exited
    async fn collect_finished_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        debug!(pid = run.pid, "Collecting finished run");

        // Not raising the stop signal: the monitor has seen, or is about to
        // see, the exit and must still report it.
        match run.monitor.await {
            Ok(Some(child)) => self.terminate(child, run.pid).await,
            Ok(None) => {}
            Err(e) => error!(pid = run.pid, "Exit monitor failed: {}", e),
        }
        self.group.release(run.pid);
        self.drain_pump(run.pump).await;
        self.state.set(RunState::Idle);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        // No async teardown possible here: kill synchronously and let the
        // aborted tasks drop their handles.
        self.stop_signal.raise();
        if let Err(e) = self.group.signal(run.pid, Signal::SIGKILL) {
            warn!(pid = run.pid, "Failed to kill core on drop: {}", e);
        }
        self.group.release(run.pid);
        run.monitor.abort();
        run.pump.abort();
        self.state.set(RunState::Idle);
        debug!(pid = run.pid, "Supervisor dropped with core still attached");
    }
}

fn launch_config_error(config: &SupervisorConfig, e: ConfigError) -> SupervisorError {
    SupervisorError::LaunchFailed {
        path: config.core_executable.display().to_string(),
        reason: e.to_string(),
    }
}
