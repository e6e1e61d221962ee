//! Monotonic fence shared between the host and GPU completion callbacks.
//!
//! A fence value must be requested by a submission before anything may
//! signal it, and the signaled value never moves backwards.

use crate::error::{AccelError, AccelResult};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct FenceState {
    completed: u64,
    requested: u64,
}

/// Counter plus completion signal for one command slot
#[derive(Debug)]
pub struct SyncFence {
    label: String,
    state: Mutex<FenceState>,
    signaled: Condvar,
}

impl SyncFence {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(FenceState::default()),
            signaled: Condvar::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, FenceState> {
        // A panicking waiter cannot leave the counters inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register that a submission will signal `value` on completion.
    pub fn request(&self, value: u64) -> AccelResult<()> {
        let mut state = self.lock();
        if value <= state.requested {
            return Err(AccelError::precondition(format!(
                "fence '{}': requested value {} is not above {}",
                self.label, value, state.requested
            )));
        }
        state.requested = value;
        Ok(())
    }

    /// Mark all work up to `value` complete and wake waiters.
    pub fn signal(&self, value: u64) -> AccelResult<()> {
        let mut state = self.lock();
        if value > state.requested {
            return Err(AccelError::precondition(format!(
                "fence '{}': signal {} was never requested (last request {})",
                self.label, value, state.requested
            )));
        }
        if value > state.completed {
            state.completed = value;
            self.signaled.notify_all();
        }
        Ok(())
    }

    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    pub fn requested_value(&self) -> u64 {
        self.lock().requested
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.lock().completed >= value
    }

    /// Block until `value` has been signaled or `timeout` elapses.
    pub fn wait_for(&self, value: u64, timeout: Duration) -> AccelResult<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        while state.completed < value {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AccelError::FenceTimeout {
                            label: self.label.clone(),
                            value,
                            completed: state.completed,
                        });
                    }
                    deadline - now
                }
                // Deadline overflowed Instant; wait in bounded slices.
                None => Duration::from_secs(3600),
            };
            state = match self.signaled.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }
}
