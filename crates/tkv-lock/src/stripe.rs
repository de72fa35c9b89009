//! Per-key lock state machine (§4.5).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tkv_error::{Error, LockError, LockerId, Result};
use tkv_types::LockUpgradeRule;

use crate::key::LockKey;
use crate::waiter::Waiter;
use crate::{LockMode, LockResult};

/// What a locker currently holds on one key, for [`LockManager::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Unowned,
    OwnedShared,
    OwnedUpgradable,
    OwnedExclusive,
}

pub(crate) enum Attempt {
    Done(LockResult),
    Illegal,
    /// Caller must park on the returned waiter (already enqueued).
    Block(Arc<Waiter>),
}

/// The full state of one `(indexId, key)` lock: current holders plus the
/// two wait queues described in §4.5 (`queueU` for upgradable/exclusive
/// requesters, `queueSX` for shared requesters).
#[derive(Default)]
pub(crate) struct LockState {
    shared_holders: HashSet<LockerId>,
    upgradable_holder: Option<LockerId>,
    exclusive_holder: Option<LockerId>,
    queue_u: VecDeque<Arc<Waiter>>,
    queue_sx: VecDeque<Arc<Waiter>>,
}

impl LockState {
    fn is_empty_and_idle(&self) -> bool {
        self.shared_holders.is_empty()
            && self.upgradable_holder.is_none()
            && self.exclusive_holder.is_none()
            && self.queue_u.is_empty()
            && self.queue_sx.is_empty()
    }

    pub(crate) fn check(&self, locker: LockerId) -> Ownership {
        if self.exclusive_holder == Some(locker) {
            Ownership::OwnedExclusive
        } else if self.upgradable_holder == Some(locker) {
            Ownership::OwnedUpgradable
        } else if self.shared_holders.contains(&locker) {
            Ownership::OwnedShared
        } else {
            Ownership::Unowned
        }
    }

    /// Current holder set, for the deadlock detector's wait-for edges.
    pub(crate) fn holders(&self) -> Vec<LockerId> {
        let mut out: Vec<LockerId> = self.shared_holders.iter().copied().collect();
        out.extend(self.upgradable_holder);
        out.extend(self.exclusive_holder);
        out
    }

    fn exclusive_waiter_at_front(&self) -> bool {
        matches!(self.queue_u.front(), Some(w) if w.kind == LockMode::Exclusive)
    }

    /// Attempt acquisition under the algorithm of §4.5. Enqueues (and
    /// returns `Block`) rather than blocking itself — the caller parks
    /// outside the stripe latch.
    pub(crate) fn try_acquire(&mut self, kind: LockMode, locker: LockerId, rule: LockUpgradeRule) -> Attempt {
        match kind {
            LockMode::Shared => self.try_shared(locker),
            LockMode::Upgradable => self.try_upgradable(locker, rule),
            LockMode::Exclusive => self.try_exclusive(locker),
        }
    }

    fn try_shared(&mut self, locker: LockerId) -> Attempt {
        if self.exclusive_holder == Some(locker) {
            return Attempt::Done(LockResult::OwnedExclusive);
        }
        if self.shared_holders.contains(&locker) {
            return Attempt::Done(LockResult::OwnedShared);
        }
        if self.exclusive_holder.is_none() && !self.exclusive_waiter_at_front() {
            self.shared_holders.insert(locker);
            Attempt::Done(LockResult::Acquired)
        } else {
            let waiter = Waiter::new(LockMode::Shared, locker);
            self.queue_sx.push_back(Arc::clone(&waiter));
            Attempt::Block(waiter)
        }
    }

    fn try_upgradable(&mut self, locker: LockerId, rule: LockUpgradeRule) -> Attempt {
        if self.exclusive_holder == Some(locker) {
            return Attempt::Done(LockResult::OwnedExclusive);
        }
        if self.upgradable_holder == Some(locker) {
            return Attempt::Done(LockResult::OwnedUpgradable);
        }
        if self.upgradable_holder.is_none() && self.shared_holders.contains(&locker) {
            // Holds only shared: an in-place promotion, governed by the
            // configured upgrade rule rather than the normal queue.
            return match rule {
                LockUpgradeRule::Strict => Attempt::Illegal,
                LockUpgradeRule::Lenient if self.shared_holders.len() != 1 => Attempt::Illegal,
                LockUpgradeRule::Lenient | LockUpgradeRule::Unchecked => {
                    self.upgradable_holder = Some(locker);
                    Attempt::Done(LockResult::Upgraded)
                }
            };
        }
        if self.upgradable_holder.is_none() {
            if self.exclusive_waiter_at_front() {
                let waiter = Waiter::new(LockMode::Upgradable, locker);
                self.queue_u.push_back(Arc::clone(&waiter));
                Attempt::Block(waiter)
            } else {
                self.upgradable_holder = Some(locker);
                self.shared_holders.insert(locker);
                Attempt::Done(LockResult::Acquired)
            }
        } else {
            let waiter = Waiter::new(LockMode::Upgradable, locker);
            self.queue_u.push_back(Arc::clone(&waiter));
            Attempt::Block(waiter)
        }
    }

    fn try_exclusive(&mut self, locker: LockerId) -> Attempt {
        if self.exclusive_holder == Some(locker) {
            return Attempt::Done(LockResult::OwnedExclusive);
        }
        if self.shared_holders.is_empty() && self.upgradable_holder.is_none() && self.exclusive_holder.is_none() {
            self.exclusive_holder = Some(locker);
            return Attempt::Done(LockResult::Acquired);
        }
        if self.upgradable_holder == Some(locker) && self.shared_holders.len() == 1 && self.shared_holders.contains(&locker) {
            self.shared_holders.remove(&locker);
            self.upgradable_holder = None;
            self.exclusive_holder = Some(locker);
            return Attempt::Done(LockResult::Upgraded);
        }
        let waiter = Waiter::new(LockMode::Exclusive, locker);
        self.queue_u.push_back(Arc::clone(&waiter));
        Attempt::Block(waiter)
    }

    /// Wakeup policy on release (§4.5): scan `queueU` first, granting an
    /// upgradable waiter if one can coexist with current shared readers,
    /// or transferring straight to an exclusive waiter if the lock is
    /// now fully idle. Only once `queueU`'s head can make no more
    /// progress does a contiguous `queueSX` run get woken.
    pub(crate) fn pump(&mut self) {
        loop {
            match self.queue_u.front().map(|w| w.kind) {
                Some(LockMode::Upgradable) => {
                    if self.upgradable_holder.is_none() {
                        let w = self.queue_u.pop_front().expect("front checked");
                        self.upgradable_holder = Some(w.locker);
                        self.shared_holders.insert(w.locker);
                        w.grant();
                        continue;
                    }
                    return;
                }
                Some(LockMode::Exclusive) => {
                    if self.shared_holders.is_empty() && self.upgradable_holder.is_none() {
                        let w = self.queue_u.pop_front().expect("front checked");
                        self.exclusive_holder = Some(w.locker);
                        w.grant();
                    }
                    return;
                }
                Some(LockMode::Shared) => unreachable!("queueU never holds a shared waiter"),
                None => break,
            }
        }
        if self.exclusive_holder.is_none() {
            while let Some(w) = self.queue_sx.pop_front() {
                self.shared_holders.insert(w.locker);
                w.grant();
            }
        }
    }

    pub(crate) fn blocking_owner(&self) -> Option<LockerId> {
        self.exclusive_holder
            .or(self.upgradable_holder)
            .or_else(|| self.shared_holders.iter().next().copied())
    }

    pub(crate) fn force_transfer_exclusive(&mut self, from: LockerId, to: LockerId) -> Result<()> {
        if self.exclusive_holder != Some(from) {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "transfer_exclusive: `from` does not hold the exclusive lock",
            }));
        }
        self.exclusive_holder = Some(to);
        Ok(())
    }

    pub(crate) fn remove_waiter(&mut self, waiter: &Arc<Waiter>) {
        if let Some(pos) = self.queue_u.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            self.queue_u.remove(pos);
        }
        if let Some(pos) = self.queue_sx.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            self.queue_sx.remove(pos);
        }
    }

    pub(crate) fn release_shared(&mut self, locker: LockerId) -> Result<()> {
        if !self.shared_holders.remove(&locker) {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "not a shared holder",
            }));
        }
        self.pump();
        Ok(())
    }

    pub(crate) fn release_upgradable(&mut self, locker: LockerId) -> Result<()> {
        if self.upgradable_holder != Some(locker) {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "not the upgradable holder",
            }));
        }
        self.upgradable_holder = None;
        self.shared_holders.remove(&locker);
        self.pump();
        Ok(())
    }

    pub(crate) fn release_exclusive(&mut self, locker: LockerId) -> Result<()> {
        if self.exclusive_holder != Some(locker) {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "not the exclusive holder",
            }));
        }
        self.exclusive_holder = None;
        self.pump();
        Ok(())
    }

    pub(crate) fn downgrade_to_shared(&mut self, locker: LockerId) -> Result<()> {
        if self.exclusive_holder == Some(locker) {
            self.exclusive_holder = None;
        } else if self.upgradable_holder == Some(locker) {
            self.upgradable_holder = None;
        } else {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "not held exclusively or upgradably",
            }));
        }
        self.shared_holders.insert(locker);
        self.pump();
        Ok(())
    }

    pub(crate) fn downgrade_to_upgradable(&mut self, locker: LockerId) -> Result<()> {
        if self.exclusive_holder != Some(locker) {
            return Err(Error::Lock(LockError::IllegalUnlock {
                reason: "not the exclusive holder",
            }));
        }
        self.exclusive_holder = None;
        self.upgradable_holder = Some(locker);
        self.shared_holders.insert(locker);
        self.pump();
        Ok(())
    }
}

/// One independently-latched slice of the lock table (§4.5).
#[derive(Default)]
pub(crate) struct Stripe {
    inner: parking_lot::Mutex<HashMap<LockKey, LockState>>,
}

impl Stripe {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut HashMap<LockKey, LockState>) -> R) -> R {
        let mut guard = self.inner.lock();
        let r = f(&mut guard);
        guard.retain(|_, state| !state.is_empty_and_idle());
        r
    }
}
