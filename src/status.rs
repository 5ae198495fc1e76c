use std::sync::Arc;

use tokio::sync::watch;

use crate::monitor::{Event, Monitor};

/// Process lifecycle states. Transitions only move forward except that
/// `Quieting`/`Quiet` may still escalate to `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Initializing,
    Running,
    Quieting,
    Quiet,
    Stopping,
    Stopped,
}

/// Cooperative cancellation channel shared by every component. The flags are
/// the sole shutdown signal; nothing in the core kills tasks.
pub struct AppStatus {
    tx: watch::Sender<ProcessState>,
    monitor: Arc<Monitor>,
}

impl AppStatus {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        let (tx, _) = watch::channel(ProcessState::Initializing);
        Self { tx, monitor }
    }

    pub fn state(&self) -> ProcessState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.tx.subscribe()
    }

    pub fn run(&self) {
        if self.transition(ProcessState::Running) {
            self.monitor.notify(Event::AppRunning);
        }
    }

    pub fn quiet(&self) {
        if self.transition(ProcessState::Quieting) {
            self.monitor.notify(Event::AppQuieting);
        }
    }

    /// Called by the listener once quieting drained its in-flight work.
    pub fn quieted(&self) {
        if self.transition(ProcessState::Quiet) {
            self.monitor.notify(Event::AppQuiet);
        }
    }

    pub fn stop(&self) {
        if self.transition(ProcessState::Stopping) {
            self.monitor.notify(Event::AppStopping);
        }
    }

    pub fn stopped(&self) {
        if self.transition(ProcessState::Stopped) {
            self.monitor.notify(Event::AppStopped);
        }
    }

    pub fn notice_signal(&self, signal: &str) {
        self.monitor.notify(Event::ProcessNoticeSignal {
            signal: signal.to_string(),
        });
    }

    pub fn running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    pub fn quieting(&self) -> bool {
        self.state() == ProcessState::Quieting
    }

    pub fn quiet_mode(&self) -> bool {
        matches!(self.state(), ProcessState::Quieting | ProcessState::Quiet)
    }

    pub fn stopping(&self) -> bool {
        matches!(self.state(), ProcessState::Stopping | ProcessState::Stopped)
    }

    /// True once the process should schedule no further consumption work.
    pub fn done(&self) -> bool {
        matches!(
            self.state(),
            ProcessState::Quieting | ProcessState::Quiet | ProcessState::Stopping | ProcessState::Stopped
        )
    }

    fn transition(&self, next: ProcessState) -> bool {
        let mut changed = false;
        self.tx.send_modify(|state| {
            if Self::allowed(*state, next) {
                *state = next;
                changed = true;
            }
        });
        changed
    }

    fn allowed(from: ProcessState, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (from, to),
            (Initializing, Running)
                | (Running, Quieting)
                | (Running, Stopping)
                | (Quieting, Quiet)
                | (Quieting, Stopping)
                | (Quiet, Stopping)
                | (Stopping, Stopped)
        )
    }
}
