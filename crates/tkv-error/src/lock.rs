//! Lock-subsystem error taxonomy (§4.7, §7 `LockFailure`).

use tkv_types::IndexId;

/// One participant of a detected wait-for cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockParticipant {
    pub index_id: IndexId,
    pub index_name: Option<String>,
    pub key: Vec<u8>,
}

/// The set of locks participating in a detected cycle (§4.7, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeadlockSet(pub Vec<DeadlockParticipant>);

impl DeadlockSet {
    #[must_use]
    pub fn new(participants: Vec<DeadlockParticipant>) -> Self {
        Self(participants)
    }

    #[must_use]
    pub fn participants(&self) -> &[DeadlockParticipant] {
        &self.0
    }
}

/// Opaque identity of the locker that owns/blocks a lock, surfaced to
/// callers for diagnostics without exposing internal arena indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockerId(pub u64);

/// Errors raised by lock acquisition (§4.5, §4.7, §7 `LockFailure`).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Timed out waiting for a lock; carries the owner that was blocking
    /// this request, if known.
    #[error("lock acquisition timed out (blocked by {blocked_by:?})")]
    Timeout { blocked_by: Option<LockerId> },

    /// The waiting thread was interrupted while parked.
    #[error("lock acquisition interrupted")]
    Interrupted,

    /// Attempted to upgrade a shared lock in a way the configured
    /// [`tkv_types::LockUpgradeRule`] forbids.
    #[error("illegal lock upgrade")]
    IllegalUpgrade,

    /// A wait-for cycle was found; carries the cycle and the locker chosen
    /// as "guilty" (farthest along in the cycle).
    #[error("deadlock detected among {0:?} locks", .set.0.len())]
    Deadlock { set: DeadlockSet, guilty: LockerId },

    /// `unlock`/`unlock_to_shared`/`unlock_to_upgradable` called on a stack
    /// entry that isn't the top of the locker's stack, or on an empty
    /// stack (§4.6).
    #[error("illegal unlock: {reason}")]
    IllegalUnlock { reason: &'static str },

    /// `unlock` called on an entry whose acquisition was an immediate
    /// upgrade (§3, §4.6).
    #[error("cannot unlock an immediate-upgrade acquisition")]
    UnlockImmediateUpgrade,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_set_carries_participants() {
        let set = DeadlockSet::new(vec![DeadlockParticipant {
            index_id: IndexId::new(7),
            index_name: Some("widgets".to_owned()),
            key: vec![1, 2, 3],
        }]);
        assert_eq!(set.participants().len(), 1);
    }
}
