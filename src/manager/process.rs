use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::instance::ManagedInstance;

pub(crate) type ProcessId = u64;

/// A running instance as tracked by the manager.
///
/// `id` never changes and is unique for the lifetime of the manager, so the
/// run task can tell whether the table still points at *its* process when it
/// cleans up.
pub(crate) struct Process<C> {
    pub(crate) id: ProcessId,
    pub(crate) cfg: C,
    pub(crate) inst: Arc<dyn ManagedInstance<C>>,
    pub(crate) stop_handle: StopHandle,
}

/// Lifecycle of a process's run task. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ProcessState {
    Running,
    /// The instance has stopped and the run loop has returned.
    Exited,
    /// The run task is done with the process table and has finished.
    Released,
}

/// Cancellation and completion pair for one process.
#[derive(Clone)]
pub(crate) struct StopHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ProcessState>,
}

/// Held by the run task to report its progress.
pub(crate) struct ExitSignal(watch::Sender<ProcessState>);

impl ExitSignal {
    pub(crate) fn exited(&self) {
        self.0.send_replace(ProcessState::Exited);
    }

    pub(crate) fn released(self) {
        self.0.send_replace(ProcessState::Released);
    }
}

impl StopHandle {
    pub(crate) fn new() -> (Self, ExitSignal) {
        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let handle = Self {
            cancel: CancellationToken::new(),
            state: state_rx,
        };
        (handle, ExitSignal(state_tx))
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests the process to stop and waits until its run task has fully
    /// finished, table cleanup included.
    ///
    /// Must not be called while holding the process table lock.
    pub(crate) async fn stop(&self) {
        self.stop_until(ProcessState::Released).await;
    }

    /// Requests the process to stop and waits only until the instance has
    /// exited. Safe to call while holding the process table lock.
    pub(crate) async fn stop_run(&self) {
        self.stop_until(ProcessState::Exited).await;
    }

    async fn stop_until(&self, target: ProcessState) {
        self.cancel.cancel();
        let mut state = self.state.clone();
        // A dropped sender means the run task is gone as well.
        let _ = state.wait_for(|state| *state >= target).await;
    }
}
