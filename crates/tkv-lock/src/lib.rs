//! Striped per-key lock manager and deadlock detector (§4.5, §4.7,
//! C5/C7).

mod deadlock;
mod key;
mod stripe;
mod waiter;

use std::sync::Arc;

use tkv_error::{Error, LockError, LockerId, Result};
use tkv_types::{Cx, LockUpgradeRule};

pub use key::LockKey;
pub use stripe::Ownership;

use deadlock::WaitingFor;
use stripe::{Attempt, Stripe};
use waiter::Waiter;

/// The three acquisition strengths a caller may request (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Upgradable,
    Exclusive,
}

/// Successful outcomes of [`LockManager::try_lock`]. Failure outcomes
/// (timeout, interruption, illegal upgrade, deadlock) are `Err` values
/// instead — idiomatic for this crate's `Result`-based API, unlike the
/// all-enum `try_lock` return the original design describes (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// Freshly granted (possibly after blocking).
    Acquired,
    OwnedShared,
    OwnedUpgradable,
    OwnedExclusive,
    /// An in-place promotion from a weaker mode already held by this
    /// locker (shared→upgradable under a permissive rule, or
    /// upgradable/shared(1)→exclusive).
    Upgraded,
}

pub(crate) enum TimeoutOrInterrupt {
    Timeout,
    Interrupted,
}

/// Striped hash table of per-key lock state (§4.5).
pub struct LockManager {
    stripes: Vec<Stripe>,
    stripe_bits: u32,
    rule: LockUpgradeRule,
    waiting_for: WaitingFor,
}

impl LockManager {
    /// `numProcessors * 16` stripes, rounded up to a power of two
    /// (§4.5).
    #[must_use]
    pub fn new(rule: LockUpgradeRule) -> Self {
        Self::with_stripe_count(key::next_pow2(num_cpus::get() * 16, 16), rule)
    }

    #[must_use]
    pub fn with_stripe_count(count: usize, rule: LockUpgradeRule) -> Self {
        let count = count.next_power_of_two().max(1);
        Self {
            stripes: (0..count).map(|_| Stripe::default()).collect(),
            stripe_bits: count.trailing_zeros(),
            rule,
            waiting_for: WaitingFor::default(),
        }
    }

    fn stripe_for(&self, key: &LockKey) -> &Stripe {
        let hash = key.hash32();
        let idx = if self.stripe_bits == 0 {
            0
        } else {
            (hash >> (32 - self.stripe_bits)) as usize
        };
        &self.stripes[idx]
    }

    fn holders_of(&self, key: &LockKey) -> Vec<LockerId> {
        self.stripe_for(key)
            .with(|map| map.get(key).map(stripe::LockState::holders).unwrap_or_default())
    }

    fn remove_waiter(&self, key: &LockKey, waiter: &Arc<Waiter>) {
        self.stripe_for(key).with(|map| {
            if let Some(state) = map.get_mut(key) {
                state.remove_waiter(waiter);
            }
        });
    }

    /// Attempt to acquire `kind` on `key` on behalf of `locker`, parking
    /// (subject to `cx`'s deadline/cancellation) if it cannot be granted
    /// immediately (§4.5).
    pub fn try_lock(&self, kind: LockMode, locker: LockerId, key: LockKey, cx: Option<&Cx>) -> Result<LockResult> {
        let attempt = self
            .stripe_for(&key)
            .with(|map| map.entry(key.clone()).or_default().try_acquire(kind, locker, self.rule));

        match attempt {
            Attempt::Done(result) => Ok(result),
            Attempt::Illegal => Err(Error::Lock(LockError::IllegalUpgrade)),
            Attempt::Block(waiter) => self.block_on(waiter, locker, key, cx),
        }
    }

    fn block_on(&self, waiter: Arc<Waiter>, locker: LockerId, key: LockKey, cx: Option<&Cx>) -> Result<LockResult> {
        self.waiting_for.record(locker, key.clone());

        if let Some(cycle) = self.waiting_for.find_cycle(locker, |k| self.holders_of(k)) {
            self.remove_waiter(&key, &waiter);
            self.waiting_for.clear(locker);
            let (set, guilty) = deadlock::to_deadlock_error(cycle);
            return Err(Error::Lock(LockError::Deadlock { set, guilty }));
        }

        let outcome = waiter.wait(cx);
        self.waiting_for.clear(locker);

        match outcome {
            Ok(()) => Ok(LockResult::Acquired),
            Err(TimeoutOrInterrupt::Timeout) => {
                if waiter.is_granted() {
                    return Ok(LockResult::Acquired);
                }
                let blocked_by = self
                    .stripe_for(&key)
                    .with(|map| map.get(&key).and_then(stripe::LockState::blocking_owner));
                self.remove_waiter(&key, &waiter);
                Err(Error::Lock(LockError::Timeout { blocked_by }))
            }
            Err(TimeoutOrInterrupt::Interrupted) => {
                if waiter.is_granted() {
                    return Ok(LockResult::Acquired);
                }
                self.remove_waiter(&key, &waiter);
                Err(Error::Lock(LockError::Interrupted))
            }
        }
    }

    pub fn unlock_shared(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .release_shared(locker)
        })
    }

    pub fn unlock_upgradable(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .release_upgradable(locker)
        })
    }

    pub fn unlock_exclusive(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .release_exclusive(locker)
        })
    }

    /// Downgrade an exclusive or upgradable hold to shared without
    /// releasing in between (§4.5 `unlock_to_shared`).
    pub fn unlock_to_shared(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .downgrade_to_shared(locker)
        })
    }

    /// Downgrade an exclusive hold to upgradable (§4.5
    /// `unlock_to_upgradable`).
    pub fn unlock_to_upgradable(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .downgrade_to_upgradable(locker)
        })
    }

    #[must_use]
    pub fn check(&self, locker: LockerId, key: &LockKey) -> Ownership {
        self.stripe_for(key)
            .with(|map| map.get(key).map_or(Ownership::Unowned, |state| state.check(locker)))
    }

    /// Hand an already-held exclusive lock directly to another locker
    /// without releasing it to the queue in between (§4.5
    /// `transfer_exclusive`). The upper `PendingTxn` chain bookkeeping
    /// this enables lives above this crate.
    pub fn transfer_exclusive(&self, key: &LockKey, from: LockerId, to: LockerId) -> Result<()> {
        self.stripe_for(key).with(|map| {
            map.get_mut(key)
                .ok_or(Error::Lock(LockError::IllegalUnlock { reason: "no such key" }))?
                .force_transfer_exclusive(from, to)
        })
    }

    /// Marks that `key`'s value has been ghosted (tombstoned) by
    /// `locker`, which must already hold the exclusive lock. The index
    /// layer that acts on this marker is out of scope here (§1
    /// Non-goals); this call only validates the precondition.
    pub fn ghosted(&self, locker: LockerId, key: &LockKey) -> Result<()> {
        if self.check(locker, key) != Ownership::OwnedExclusive {
            return Err(Error::illegal_state("ghosted requires the exclusive lock to already be held"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tkv_types::IndexId;

    fn key(k: u8) -> LockKey {
        LockKey::new(IndexId::new(1), vec![k])
    }

    #[test]
    fn s1_lock_upgrade_path() {
        let mgr = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let t1 = LockerId(1);
        let k = key(1);

        assert_eq!(
            mgr.try_lock(LockMode::Shared, t1, k.clone(), None).unwrap(),
            LockResult::Acquired
        );
        assert_eq!(mgr.check(t1, &k), Ownership::OwnedShared);

        // Sole shared holder: lenient rule allows upgrade to upgradable.
        assert_eq!(
            mgr.try_lock(LockMode::Upgradable, t1, k.clone(), None).unwrap(),
            LockResult::Upgraded
        );
        assert_eq!(mgr.check(t1, &k), Ownership::OwnedUpgradable);

        // Upgradable + sole shared holder (itself) -> exclusive.
        assert_eq!(
            mgr.try_lock(LockMode::Exclusive, t1, k.clone(), None).unwrap(),
            LockResult::Upgraded
        );
        assert_eq!(mgr.check(t1, &k), Ownership::OwnedExclusive);

        mgr.unlock_exclusive(t1, &k).unwrap();
        assert_eq!(mgr.check(t1, &k), Ownership::Unowned);
    }

    #[test]
    fn strict_rule_forbids_shared_to_upgradable() {
        let mgr = LockManager::with_stripe_count(4, LockUpgradeRule::Strict);
        let t1 = LockerId(1);
        let k = key(1);
        mgr.try_lock(LockMode::Shared, t1, k.clone(), None).unwrap();
        let err = mgr.try_lock(LockMode::Upgradable, t1, k, None).unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::IllegalUpgrade)));
    }

    #[test]
    fn second_shared_holder_blocks_lenient_upgrade() {
        let mgr = LockManager::with_stripe_count(4, LockUpgradeRule::Lenient);
        let (t1, t2) = (LockerId(1), LockerId(2));
        let k = key(1);
        mgr.try_lock(LockMode::Shared, t1, k.clone(), None).unwrap();
        mgr.try_lock(LockMode::Shared, t2, k.clone(), None).unwrap();
        let err = mgr.try_lock(LockMode::Upgradable, t1, k, None).unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::IllegalUpgrade)));
    }

    #[test]
    fn exclusive_waiter_blocks_new_shared_joiners() {
        let mgr = Arc::new(LockManager::with_stripe_count(4, LockUpgradeRule::Strict));
        let (t1, t2, t3) = (LockerId(1), LockerId(2), LockerId(3));
        let k = key(1);
        mgr.try_lock(LockMode::Shared, t1, k.clone(), None).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let (mgr2, k2, b2) = (Arc::clone(&mgr), k.clone(), Arc::clone(&barrier));
        let writer = thread::spawn(move || {
            b2.wait();
            mgr2.try_lock(LockMode::Exclusive, t2, k2, None).unwrap();
        });
        barrier.wait();
        thread::sleep(Duration::from_millis(20));

        // A later shared request must queue behind the waiting writer.
        let cx = Cx::with_timeout(Duration::from_millis(20));
        let err = mgr.try_lock(LockMode::Shared, t3, k.clone(), Some(&cx)).unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::Timeout { .. })));

        mgr.unlock_shared(t1, &k).unwrap();
        writer.join().unwrap();
        mgr.unlock_exclusive(t2, &k).unwrap();
    }

    #[test]
    fn s2_two_locker_deadlock_detected_exactly_once() {
        let mgr = Arc::new(LockManager::with_stripe_count(4, LockUpgradeRule::Strict));
        let (t1, t2) = (LockerId(1), LockerId(2));
        let a = key(b'A');
        let b = key(b'B');

        mgr.try_lock(LockMode::Exclusive, t1, a.clone(), None).unwrap();
        mgr.try_lock(LockMode::Exclusive, t2, b.clone(), None).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let (mgr1, b1, bar1) = (Arc::clone(&mgr), b.clone(), Arc::clone(&barrier));
        let h1 = thread::spawn(move || {
            bar1.wait();
            mgr1.try_lock(LockMode::Exclusive, t1, b1, None)
        });

        let (mgr2, a2, bar2) = (Arc::clone(&mgr), a.clone(), Arc::clone(&barrier));
        let h2 = thread::spawn(move || {
            bar2.wait();
            // give h1 a head start so it registers waiting_for first
            thread::sleep(Duration::from_millis(20));
            mgr2.try_lock(LockMode::Exclusive, t2, a2, None)
        });

        // h2 runs second (after its extra sleep), so it is the one that
        // observes the already-registered cycle and backs off; h1 is
        // left parked on B until t2's hold is released below.
        let r2 = h2.join().unwrap();
        assert!(matches!(r2, Err(Error::Lock(LockError::Deadlock { .. }))));

        mgr.unlock_exclusive(t2, &b).unwrap();
        let r1 = h1.join().unwrap();
        assert!(matches!(r1, Ok(LockResult::Acquired)));
        mgr.unlock_exclusive(t1, &a).unwrap();
        mgr.unlock_exclusive(t1, &b).unwrap();
    }
}
