//! Task handles - Completion slot shared between a worker and the submitter

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cancel::CancellationToken;
use crate::core::{Error, Result};

enum Slot<T> {
    Pending,
    Running,
    Done(Result<T>),
    Taken,
}

pub(crate) struct TaskState<T> {
    id: u64,
    slot: Mutex<Slot<T>>,
    done: Condvar,
    token: CancellationToken,
}

impl<T> TaskState<T> {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Claim the task for execution. `false` if it was cancelled first.
    pub fn start(&self) -> bool {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) && !self.token.is_cancelled() {
            *slot = Slot::Running;
            true
        } else {
            false
        }
    }

    pub fn complete(&self, result: Result<T>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending | Slot::Running) {
            *slot = Slot::Done(result);
        }
        self.done.notify_all();
    }

    /// Resolve a task that never started as cancelled. No-op otherwise.
    pub fn abandon(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Done(Err(Error::Cancelled));
            self.done.notify_all();
        }
    }

    fn is_done(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Done(_) | Slot::Taken)
    }
}

/// Handle to a submitted task's eventual result.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(state: Arc<TaskState<T>>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.token().is_cancelled()
    }

    /// Request cancellation.
    ///
    /// A task that has not started yet resolves to [`Error::Cancelled`]
    /// immediately and never runs. A running task is signalled through its
    /// token and finishes on its own terms. Returns `false` if the task had
    /// already finished.
    pub fn cancel(&self) -> bool {
        if self.state.is_done() {
            return false;
        }
        self.state.token().cancel();
        self.state.abandon();
        true
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<T> {
        let mut slot = self.state.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Done(result) => return result,
                Slot::Taken => {
                    return Err(Error::InvalidState(format!(
                        "result of task {} already taken",
                        self.state.id
                    )));
                }
                pending => {
                    *slot = pending;
                    self.state.done.wait(&mut slot);
                }
            }
        }
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// On timeout the task is left alone and [`Error::Timeout`] returned;
    /// the handle can be waited on again.
    pub fn join_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Done(result) => return result,
                Slot::Taken => {
                    return Err(Error::InvalidState(format!(
                        "result of task {} already taken",
                        self.state.id
                    )));
                }
                pending => {
                    *slot = pending;
                    if self.state.done.wait_until(&mut slot, deadline).timed_out()
                        && !matches!(*slot, Slot::Done(_))
                    {
                        return Err(Error::Timeout(format!(
                            "task {} did not finish within {:?}",
                            self.state.id, timeout
                        )));
                    }
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.state.id)
            .field("done", &self.is_done())
            .finish()
    }
}
