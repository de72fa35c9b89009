//! A live transaction: a [`tkv_txn::Locker`] paired with an in-flight
//! redo buffer and an undo log for in-process rollback (§4.6, §6).

use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::{LockerId, Result};
use tkv_lock::{LockKey, LockManager, LockMode, LockResult};
use tkv_redo::{RedoEncoder, RedoOp};
use tkv_txn::Locker;
use tkv_types::{DurabilityMode, IndexId, TerminatorPolicy, TxnId};

use crate::index::ByteIndex;

/// One already-applied write, kept so [`Txn::rollback`] can restore the
/// index to its pre-transaction state. Recovery replay (`tkv-recovery`)
/// deliberately has no equivalent of this — it applies eagerly and
/// never undoes (§4.11 point 3) — but a *live*, not-yet-crashed
/// transaction can and must undo its own writes.
struct UndoEntry {
    store: Arc<dyn ByteIndex>,
    key: Vec<u8>,
    prior: Option<Vec<u8>>,
}

pub struct Txn {
    id: TxnId,
    locker: Arc<Mutex<Locker>>,
    durability: DurabilityMode,
    encoder: RedoEncoder,
    redo: Vec<u8>,
    undo: Vec<UndoEntry>,
}

impl Txn {
    pub(crate) fn new(id: TxnId, durability: DurabilityMode, policy: TerminatorPolicy, token: u32) -> Self {
        let mut encoder = RedoEncoder::new(policy, token);
        let mut redo = Vec::new();
        encoder.encode(&RedoOp::TxnEnter { id }, &mut redo);
        Self {
            id,
            locker: Arc::new(Mutex::new(Locker::new(LockerId(id.get())))),
            durability,
            encoder,
            redo,
            undo: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    #[must_use]
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    #[must_use]
    pub(crate) fn locker_handle(&self) -> Arc<Mutex<Locker>> {
        Arc::clone(&self.locker)
    }

    /// Acquire `mode` on `key`, reporting the outcome (§6 `touch`,
    /// `lockShared/Upgradable/Exclusive`).
    ///
    /// # Errors
    /// Propagates lock-manager failures (timeout, deadlock, illegal
    /// upgrade).
    pub(crate) fn lock(&mut self, manager: &LockManager, mode: LockMode, key: LockKey) -> Result<LockResult> {
        let mut locker = self.locker.lock();
        let result = manager.try_lock(mode, locker.id(), key.clone(), None)?;
        locker.push(key, mode, matches!(result, LockResult::Upgraded));
        Ok(result)
    }

    pub(crate) fn record_store(&mut self, index: IndexId, store: Arc<dyn ByteIndex>, key: &[u8], value: Vec<u8>) {
        let prior = store.get(key);
        self.undo.push(UndoEntry { store: Arc::clone(&store), key: key.to_vec(), prior });
        store.put(key, value.clone());
        self.encoder.encode(&RedoOp::TxnStore { id: self.id, index, key: key.to_vec(), value }, &mut self.redo);
    }

    pub(crate) fn record_delete(&mut self, index: IndexId, store: Arc<dyn ByteIndex>, key: &[u8]) {
        let prior = store.remove(key);
        self.undo.push(UndoEntry { store, key: key.to_vec(), prior });
        self.encoder.encode(&RedoOp::TxnDelete { id: self.id, index, key: key.to_vec() }, &mut self.redo);
    }

    /// Commit: append a final redo marker and release every held lock.
    /// Returns the redo bytes this transaction produced, for the caller
    /// to append to the durable stream.
    ///
    /// # Errors
    /// Propagates lock-release failures (an empty-stack unlock, an
    /// immediate-upgrade top popped directly).
    pub(crate) fn commit(mut self, manager: &LockManager) -> Result<Vec<u8>> {
        self.encoder.encode(&RedoOp::TxnCommitFinal { id: self.id }, &mut self.redo);
        let mut locker = self.locker.lock();
        drain(&mut locker, manager)?;
        drop(locker);
        Ok(self.redo)
    }

    /// Roll back: undo every recorded write in reverse order, append a
    /// rollback marker, and release every held lock.
    ///
    /// # Errors
    /// Propagates lock-release failures.
    pub(crate) fn rollback(mut self, manager: &LockManager) -> Result<Vec<u8>> {
        for entry in self.undo.drain(..).rev() {
            match entry.prior {
                Some(value) => entry.store.put(&entry.key, value),
                None => {
                    entry.store.remove(&entry.key);
                }
            }
        }
        self.encoder.encode(&RedoOp::TxnRollbackFinal { id: self.id }, &mut self.redo);
        let mut locker = self.locker.lock();
        drain(&mut locker, manager)?;
        drop(locker);
        Ok(self.redo)
    }
}

/// Releases every lock a transaction's `Locker` still holds, the same
/// pattern `tkv-recovery`'s lane jobs use to finalize a crash-recovered
/// txn (§4.6 `scope_exit_all` plus a final unscoped drain).
fn drain(locker: &mut Locker, manager: &LockManager) -> Result<()> {
    locker.scope_exit_all(manager)?;
    while locker.depth() > 0 {
        locker.unlock(manager)?;
    }
    Ok(())
}
