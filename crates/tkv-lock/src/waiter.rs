//! Per-request parking slot, modeled on [`tkv_latch`]'s `Slot` but keyed
//! by the requesting locker so the deadlock detector can read `kind`
//! and `locker` without touching the wait/wake machinery.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tkv_error::LockerId;
use tkv_types::Cx;

use crate::LockMode;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Granted,
}

pub(crate) struct Waiter {
    pub(crate) kind: LockMode,
    pub(crate) locker: LockerId,
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl Waiter {
    pub(crate) fn new(kind: LockMode, locker: LockerId) -> Arc<Self> {
        Arc::new(Self {
            kind,
            locker,
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn grant(&self) {
        *self.state.lock() = SlotState::Granted;
        self.cond.notify_all();
    }

    pub(crate) fn is_granted(&self) -> bool {
        *self.state.lock() == SlotState::Granted
    }

    /// Park until granted, cancelled, or `cx`'s deadline passes.
    pub(crate) fn wait(&self, cx: Option<&Cx>) -> Result<(), crate::TimeoutOrInterrupt> {
        let mut guard = self.state.lock();
        loop {
            if *guard == SlotState::Granted {
                return Ok(());
            }
            if let Some(cx) = cx {
                if cx.is_cancelled() {
                    return Err(crate::TimeoutOrInterrupt::Interrupted);
                }
                let wait_for = cx.remaining().unwrap_or(CANCEL_POLL_INTERVAL);
                let result = self.cond.wait_for(&mut guard, wait_for);
                if *guard == SlotState::Granted {
                    return Ok(());
                }
                if result.timed_out() && cx.is_expired() {
                    return Err(crate::TimeoutOrInterrupt::Timeout);
                }
            } else {
                self.cond.wait_for(&mut guard, CANCEL_POLL_INTERVAL);
            }
        }
    }
}
