//! Per-transaction scoped lock stack with nested savepoints (§4.6, C6).

mod stack;

use std::time::Duration;

use tkv_error::{Error, LockError, LockerId, Result};
use tkv_lock::{LockKey, LockManager, LockMode};
use tkv_types::LockUpgradeRule;

use stack::{Slot, Stack};

/// Snapshot captured on [`Locker::scope_enter`] and consulted by
/// [`Locker::scope_unlock_all`]/[`Locker::promote`] (§4.6).
#[derive(Debug, Clone)]
pub struct ParentScope {
    tail_len: usize,
    pub mode: LockUpgradeRule,
    pub timeout: Option<Duration>,
    pub flags: u32,
    pub redo_savepoint: u64,
}

/// A per-transaction handle owning a stack of acquired locks, grouped
/// into nested scopes for savepoint support (§4.6).
pub struct Locker {
    id: LockerId,
    stack: Stack,
    scopes: Vec<ParentScope>,
}

impl Locker {
    #[must_use]
    pub fn new(id: LockerId) -> Self {
        Self {
            id,
            stack: Stack::default(),
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> LockerId {
        self.id
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn current_scope_base(&self) -> usize {
        self.scopes.last().map_or(0, |s| s.tail_len)
    }

    /// Acquire `kind` on `key` through `manager`, then record the
    /// acquisition on the stack. `is_upgrade` marks this as an
    /// in-place promotion of a lock already held by this locker rather
    /// than a fresh acquisition (§4.6).
    ///
    /// # Errors
    /// Propagates [`LockManager::try_lock`]'s errors (timeout,
    /// interruption, illegal upgrade, deadlock) unchanged.
    pub fn acquire(
        &mut self,
        manager: &LockManager,
        kind: LockMode,
        key: LockKey,
        is_upgrade: bool,
        cx: Option<&tkv_types::Cx>,
    ) -> Result<()> {
        if let Err(err) = manager.try_lock(kind, self.id, key.clone(), cx) {
            tracing::debug!(locker = ?self.id, ?kind, ?err, "lock acquisition failed");
            return Err(err);
        }
        self.push(key, kind, is_upgrade);
        Ok(())
    }

    /// Record an acquisition already granted by the lock manager
    /// (§4.6 `push`). Deduplicates an immediate upgrade of the key
    /// already at the top of the *current scope's* stack segment,
    /// rewriting its mode in place instead of pushing a new entry.
    pub fn push(&mut self, key: LockKey, mode: LockMode, is_upgrade: bool) {
        let scope_base = self.current_scope_base();
        if is_upgrade && self.stack.len() > scope_base {
            if let Some((top, _)) = self.stack.peek() {
                if top.key == key {
                    self.stack.set_top(mode, true);
                    return;
                }
            }
        }
        self.stack.push(key, mode, is_upgrade);
    }

    #[must_use]
    pub fn peek(&self) -> Option<(&LockKey, LockMode, bool)> {
        self.stack.peek().map(|(slot, is_upgrade)| (&slot.key, slot.mode, is_upgrade))
    }

    /// Unlock the top-of-stack entry (§4.6 `unlock`). Only the top may
    /// ever be unlocked directly; an immediate-upgrade entry can never
    /// be unlocked this way.
    ///
    /// # Errors
    /// [`LockError::UnlockImmediateUpgrade`] if the top entry is an
    /// immediate upgrade; [`Error::IllegalState`] if the stack is
    /// empty.
    pub fn unlock(&mut self, manager: &LockManager) -> Result<()> {
        let (key, mode, is_upgrade) = self
            .peek()
            .map(|(k, m, u)| (k.clone(), m, u))
            .ok_or_else(|| Error::illegal_state("unlock on an empty locker stack"))?;
        if is_upgrade {
            return Err(Error::Lock(LockError::UnlockImmediateUpgrade));
        }
        release(manager, self.id, &key, mode)?;
        self.stack.pop();
        Ok(())
    }

    /// Push a new nested scope, capturing enough state to restore to
    /// it later (§4.6 `scope_enter`).
    pub fn scope_enter(&mut self, mode: LockUpgradeRule, timeout: Option<Duration>, flags: u32, redo_savepoint: u64) {
        self.scopes.push(ParentScope {
            tail_len: self.stack.len(),
            mode,
            timeout,
            flags,
            redo_savepoint,
        });
    }

    /// The innermost active scope's captured state, if any.
    #[must_use]
    pub fn current_scope(&self) -> Option<&ParentScope> {
        self.scopes.last()
    }

    /// Commit the inner scope by merging its acquisitions into the
    /// parent: the scope marker is dropped without releasing anything
    /// (§4.6 `promote`).
    ///
    /// # Errors
    /// [`Error::IllegalState`] if there is no active scope.
    pub fn promote(&mut self) -> Result<()> {
        self.scopes
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::illegal_state("promote with no active scope"))
    }

    /// Pop back to the innermost scope's remembered tail, releasing
    /// every lock popped. An entry recorded as an immediate upgrade is
    /// downgraded back to upgradable rather than fully released, since
    /// the weaker hold it promoted is still logically owned further
    /// down the stack (§4.6).
    ///
    /// # Errors
    /// [`Error::IllegalState`] if there is no active scope.
    pub fn scope_unlock_all(&mut self, manager: &LockManager) -> Result<()> {
        let parent = self
            .scopes
            .pop()
            .ok_or_else(|| Error::illegal_state("scope_unlock_all with no active scope"))?;
        while self.stack.len() > parent.tail_len {
            let (Slot { key, mode }, is_upgrade) = self.stack.pop().expect("len > tail_len implies a slot exists");
            if is_upgrade {
                manager.unlock_to_upgradable(self.id, &key)?;
            } else {
                release(manager, self.id, &key, mode)?;
            }
        }
        Ok(())
    }

    /// Drop every scope, releasing every lock acquired in any of them
    /// (§4.6 `scope_exit_all`).
    ///
    /// # Errors
    /// Propagates the first unlock failure encountered.
    pub fn scope_exit_all(&mut self, manager: &LockManager) -> Result<()> {
        while !self.scopes.is_empty() {
            self.scope_unlock_all(manager)?;
        }
        Ok(())
    }

    /// Detach every committed exclusive lock from the table and hand
    /// it to `pending` (a `PendingTxn` identity owned by the caller's
    /// durability-confirmation pipeline, outside this crate's scope);
    /// every other lock is released outright (§4.6
    /// `transfer_exclusive`). Drains the entire stack and every scope.
    ///
    /// # Errors
    /// Propagates the first manager failure encountered.
    pub fn transfer_exclusive(&mut self, manager: &LockManager, pending: LockerId) -> Result<()> {
        self.scopes.clear();
        while let Some((Slot { key, mode }, _)) = self.stack.pop() {
            if mode == LockMode::Exclusive {
                manager.transfer_exclusive(&key, self.id, pending)?;
            } else {
                release(manager, self.id, &key, mode)?;
            }
        }
        Ok(())
    }
}

fn release(manager: &LockManager, locker: LockerId, key: &LockKey, mode: LockMode) -> Result<()> {
    match mode {
        LockMode::Shared => manager.unlock_shared(locker, key),
        LockMode::Upgradable => manager.unlock_upgradable(locker, key),
        LockMode::Exclusive => manager.unlock_exclusive(locker, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkv_types::IndexId;

    fn k(n: u8) -> LockKey {
        LockKey::new(IndexId::new(1), vec![n])
    }

    #[test]
    fn push_dedups_immediate_upgrade_of_top_within_same_scope() {
        let mut locker = Locker::new(LockerId(1));
        locker.push(k(1), LockMode::Shared, false);
        locker.push(k(1), LockMode::Upgradable, true);
        assert_eq!(locker.depth(), 1);
        let (key, mode, is_upgrade) = locker.peek().unwrap();
        assert_eq!(*key, k(1));
        assert_eq!(mode, LockMode::Upgradable);
        assert!(is_upgrade);
    }

    #[test]
    fn push_does_not_dedup_across_a_scope_boundary() {
        let mut locker = Locker::new(LockerId(1));
        locker.push(k(1), LockMode::Shared, false);
        locker.scope_enter(LockUpgradeRule::Strict, None, 0, 0);
        locker.push(k(1), LockMode::Upgradable, true);
        assert_eq!(locker.depth(), 2);
    }

    #[test]
    fn invariant_4_scope_unlock_all_restores_stack_bit_for_bit() {
        let manager = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let mut locker = Locker::new(LockerId(1));

        locker.acquire(&manager, LockMode::Shared, k(1), false, None).unwrap();
        let depth_before = locker.depth();

        locker.scope_enter(LockUpgradeRule::Lenient, None, 0, 0);
        locker.acquire(&manager, LockMode::Shared, k(2), false, None).unwrap();
        locker.acquire(&manager, LockMode::Exclusive, k(3), false, None).unwrap();
        assert_eq!(locker.depth(), depth_before + 2);

        locker.scope_unlock_all(&manager).unwrap();
        assert_eq!(locker.depth(), depth_before);
        assert_eq!(locker.peek().unwrap().0, &k(1));

        // the locks taken inside the scope are actually gone
        assert_eq!(manager.check(LockerId(1), &k(2)), tkv_lock::Ownership::Unowned);
        assert_eq!(manager.check(LockerId(1), &k(3)), tkv_lock::Ownership::Unowned);
        assert_eq!(manager.check(LockerId(1), &k(1)), tkv_lock::Ownership::OwnedShared);
    }

    #[test]
    fn promote_keeps_inner_acquisitions_for_the_parent() {
        let manager = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let mut locker = Locker::new(LockerId(1));

        locker.scope_enter(LockUpgradeRule::Lenient, None, 0, 0);
        locker.acquire(&manager, LockMode::Shared, k(1), false, None).unwrap();
        locker.promote().unwrap();
        assert_eq!(locker.scope_depth(), 0);
        assert_eq!(locker.depth(), 1);
        assert_eq!(manager.check(LockerId(1), &k(1)), tkv_lock::Ownership::OwnedShared);
    }

    #[test]
    fn unlock_rejects_immediate_upgrade_top() {
        let manager = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let mut locker = Locker::new(LockerId(1));
        locker.acquire(&manager, LockMode::Shared, k(1), false, None).unwrap();
        locker
            .acquire(&manager, LockMode::Upgradable, k(1), true, None)
            .unwrap();
        let err = locker.unlock(&manager).unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::UnlockImmediateUpgrade)));
    }

    #[test]
    fn transfer_exclusive_hands_off_exclusive_locks_and_releases_the_rest() {
        let manager = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let mut locker = Locker::new(LockerId(1));
        let pending = LockerId(99);

        locker.acquire(&manager, LockMode::Shared, k(1), false, None).unwrap();
        locker.acquire(&manager, LockMode::Exclusive, k(2), false, None).unwrap();

        locker.transfer_exclusive(&manager, pending).unwrap();

        assert_eq!(locker.depth(), 0);
        assert_eq!(manager.check(LockerId(1), &k(1)), tkv_lock::Ownership::Unowned);
        assert_eq!(manager.check(LockerId(1), &k(2)), tkv_lock::Ownership::Unowned);
        assert_eq!(manager.check(pending, &k(2)), tkv_lock::Ownership::OwnedExclusive);
    }
}
