//! Supervisor run state and stop signalling
//!
//! Defines the lifecycle state machine for the supervised core and the
//! leveled signal used to interrupt the exit monitor.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle states of the supervised core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No core process is managed
    Idle,

    /// Pipes, process and config delivery are in progress
    Starting,

    /// Core is alive and monitored
    Running,

    /// Caller-initiated teardown in progress
    Stopping,
}

impl RunState {
    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Starting => 1,
            RunState::Running => 2,
            RunState::Stopping => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Starting,
            2 => RunState::Running,
            3 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Starting => write!(f, "starting"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Run state shared between the caller, the exit monitor and `is_running`
///
/// Backed by a single atomic so every context reads and transitions it
/// without locking.
#[derive(Debug, Clone, Default)]
pub struct SharedRunState(Arc<AtomicU8>);

impl SharedRunState {
    /// Create a new shared state in `Idle`
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state
    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the state unconditionally
    pub fn set(&self, state: RunState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Atomically move from `from` to `to`
    ///
    /// Returns false and leaves the state untouched if it was not `from`.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check if the core is considered running
    pub fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }
}

/// Manual-reset stop event
///
/// Once raised it stays raised until the next `reset`, so a waiter that
/// subscribes late still observes it.
#[derive(Debug)]
pub struct StopSignal {
    sender: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Clear the signal ahead of a new run
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// Raise the signal
    pub fn raise(&self) {
        self.sender.send_replace(true);
    }

    /// Create a waiter observing this signal
    pub fn subscribe(&self) -> StopWaiter {
        StopWaiter {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`StopSignal`]
#[derive(Debug, Clone)]
pub struct StopWaiter {
    receiver: watch::Receiver<bool>,
}

impl StopWaiter {
    pub fn is_raised(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the signal is raised
    ///
    /// Also resolves if the owning `StopSignal` is dropped.
    pub async fn raised(&mut self) {
        loop {
            let raised = *self.receiver.borrow_and_update();
            if raised {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
