//! The recovery visitor: drives [`RecoverySink`] from a decoded redo
//! stream through [`RecoveryPool`] lanes (§4.11).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::{Error, Result};
use tkv_error::LockerId;
use tkv_lock::{LockKey, LockManager, LockMode};
use tkv_redo::{RedoVisitor, VisitResult};
use tkv_txn::Locker;
use tkv_types::{IndexId, TxnId};

use crate::pool::RecoveryPool;
use crate::sink::RecoverySink;

/// Marks synthetic locker identities minted for autocommit (non-`Txn*`)
/// ops, kept out of the range real `txnId`s occupy.
const AUTOCOMMIT_TAG: u64 = 1 << 63;

type TxnMap = Mutex<HashMap<TxnId, Arc<Mutex<Locker>>>>;

pub struct RecoveryVisitor<S: RecoverySink + 'static> {
    pool: RecoveryPool,
    manager: Arc<LockManager>,
    txns: Arc<TxnMap>,
    sink: Arc<S>,
    lenient: bool,
    failure: Arc<Mutex<Option<Error>>>,
    autocommit_seq: AtomicU64,
}

impl<S: RecoverySink + 'static> RecoveryVisitor<S> {
    #[must_use]
    pub fn new(manager: Arc<LockManager>, sink: Arc<S>, max_threads: usize, lenient: bool) -> Self {
        let lanes = (max_threads.max(1) * 2).next_power_of_two();
        Self {
            pool: RecoveryPool::new(lanes),
            manager,
            txns: Arc::new(Mutex::new(HashMap::new())),
            sink,
            lenient,
            failure: Arc::new(Mutex::new(None)),
            autocommit_seq: AtomicU64::new(0),
        }
    }

    /// Block until every currently queued op has finished, then report
    /// the first error any of them hit, if any.
    ///
    /// # Errors
    /// The first error recorded by any replayed op.
    pub fn finish(self) -> Result<()> {
        self.pool.barrier();
        drop(self.pool);
        let failure = self.failure.lock().take();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_failure(failure: &Mutex<Option<Error>>, err: Error) {
        let mut slot = failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn has_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn lane_for_txn(&self, id: TxnId) -> usize {
        self.pool.lane_for(id.get())
    }

    fn lane_for_key(&self, index: IndexId, key: &[u8]) -> usize {
        self.pool.lane_for(LockKey::new(index, key.to_vec()).hash32() as u64)
    }

    fn new_autocommit_locker(&self) -> Locker {
        let seq = self.autocommit_seq.fetch_add(1, Ordering::Relaxed);
        Locker::new(LockerId(AUTOCOMMIT_TAG | seq))
    }

    fn locker_for(&self, id: TxnId) -> Option<Arc<Mutex<Locker>>> {
        self.txns.lock().get(&id).cloned()
    }
}

fn drain_locker(locker: &mut Locker, manager: &LockManager) -> Result<()> {
    while locker.depth() > 0 {
        locker.unlock(manager)?;
    }
    Ok(())
}

impl<S: RecoverySink + 'static> RedoVisitor for RecoveryVisitor<S> {
    fn reset(&mut self) -> VisitResult {
        self.pool.barrier();
        let drained: Vec<_> = self.txns.lock().drain().collect();
        for (_, locker_arc) in drained {
            let mut locker = locker_arc.lock();
            if let Err(e) = drain_locker(&mut locker, &self.manager) {
                Self::record_failure(&self.failure, e);
            }
        }
        VisitResult::Continue
    }

    fn txn_enter(&mut self, id: TxnId) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        self.txns
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Locker::new(LockerId(id.get())))));
        VisitResult::Continue
    }

    fn txn_rollback(&mut self, id: TxnId) -> VisitResult {
        self.dispatch_on_txn(id, move |locker, manager, _sink| drain_locker(locker, manager))
    }

    fn txn_rollback_final(&mut self, id: TxnId) -> VisitResult {
        let txns = Arc::clone(&self.txns);
        let manager = Arc::clone(&self.manager);
        let failure = Arc::clone(&self.failure);
        let lane = self.lane_for_txn(id);
        self.pool.submit(
            lane,
            Box::new(move || {
                if let Some(locker_arc) = txns.lock().remove(&id) {
                    let mut locker = locker_arc.lock();
                    if let Err(e) = drain_locker(&mut locker, &manager) {
                        Self::record_failure(&failure, e);
                    }
                }
            }),
        );
        VisitResult::Continue
    }

    fn txn_commit(&mut self, _id: TxnId) -> VisitResult {
        // values are applied as each op is replayed (§4.11 point 3); a
        // non-final commit has nothing further to do but keeps the
        // txn live for any ops still to come under the same id.
        VisitResult::Continue
    }

    fn txn_commit_final(&mut self, id: TxnId) -> VisitResult {
        let txns = Arc::clone(&self.txns);
        let manager = Arc::clone(&self.manager);
        let failure = Arc::clone(&self.failure);
        let lane = self.lane_for_txn(id);
        self.pool.submit(
            lane,
            Box::new(move || {
                if let Some(locker_arc) = txns.lock().remove(&id) {
                    let mut locker = locker_arc.lock();
                    if let Err(e) = drain_locker(&mut locker, &manager) {
                        Self::record_failure(&failure, e);
                    }
                }
            }),
        );
        VisitResult::Continue
    }

    fn store(&mut self, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        let manager = Arc::clone(&self.manager);
        let sink = Arc::clone(&self.sink);
        let failure = Arc::clone(&self.failure);
        let mut locker = self.new_autocommit_locker();
        let key = key.to_vec();
        let value = value.to_vec();
        let lane = self.lane_for_key(index, &key);
        self.pool.submit(
            lane,
            Box::new(move || {
                let result = locker
                    .acquire(&manager, LockMode::Exclusive, LockKey::new(index, key.clone()), false, None)
                    .and_then(|()| sink.apply_store(index, &key, &value))
                    .and_then(|()| locker.unlock(&manager));
                if let Err(e) = result {
                    Self::record_failure(&failure, e);
                }
            }),
        );
        VisitResult::Continue
    }

    fn store_no_lock(&mut self, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        let sink = Arc::clone(&self.sink);
        let failure = Arc::clone(&self.failure);
        let (key, value) = (key.to_vec(), value.to_vec());
        let lane = self.lane_for_key(index, &key);
        self.pool.submit(
            lane,
            Box::new(move || {
                if let Err(e) = sink.apply_store(index, &key, &value) {
                    Self::record_failure(&failure, e);
                }
            }),
        );
        VisitResult::Continue
    }

    fn delete(&mut self, index: IndexId, key: &[u8]) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        let manager = Arc::clone(&self.manager);
        let sink = Arc::clone(&self.sink);
        let failure = Arc::clone(&self.failure);
        let mut locker = self.new_autocommit_locker();
        let key = key.to_vec();
        let lane = self.lane_for_key(index, &key);
        self.pool.submit(
            lane,
            Box::new(move || {
                let result = locker
                    .acquire(&manager, LockMode::Exclusive, LockKey::new(index, key.clone()), false, None)
                    .and_then(|()| sink.apply_delete(index, &key))
                    .and_then(|()| locker.unlock(&manager));
                if let Err(e) = result {
                    Self::record_failure(&failure, e);
                }
            }),
        );
        VisitResult::Continue
    }

    fn delete_no_lock(&mut self, index: IndexId, key: &[u8]) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        let sink = Arc::clone(&self.sink);
        let failure = Arc::clone(&self.failure);
        let key = key.to_vec();
        let lane = self.lane_for_key(index, &key);
        self.pool.submit(
            lane,
            Box::new(move || {
                if let Err(e) = sink.apply_delete(index, &key) {
                    Self::record_failure(&failure, e);
                }
            }),
        );
        VisitResult::Continue
    }

    fn txn_store(&mut self, id: TxnId, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
        let key = key.to_vec();
        let value = value.to_vec();
        self.dispatch_on_txn(id, move |locker, manager, sink| {
            locker.acquire(manager, LockMode::Upgradable, LockKey::new(index, key.clone()), false, None)?;
            sink.apply_store(index, &key, &value)
        })
    }

    fn txn_delete(&mut self, id: TxnId, index: IndexId, key: &[u8]) -> VisitResult {
        let key = key.to_vec();
        self.dispatch_on_txn(id, move |locker, manager, sink| {
            locker.acquire(manager, LockMode::Upgradable, LockKey::new(index, key.clone()), false, None)?;
            sink.apply_delete(index, &key)
        })
    }

    fn rename_index(&mut self, id: TxnId, index: IndexId, new_name: &[u8]) -> VisitResult {
        let new_name = new_name.to_vec();
        self.dispatch_on_txn(id, move |_locker, _manager, sink| sink.apply_rename_index(index, &new_name))
    }

    fn delete_index(&mut self, id: TxnId, index: IndexId) -> VisitResult {
        self.dispatch_on_txn(id, move |_locker, _manager, sink| sink.apply_delete_index(index))
    }

    fn txn_custom(&mut self, id: TxnId, msg: &[u8]) -> VisitResult {
        tracing::debug!(txn = id.get(), len = msg.len(), "ignoring opaque txn_custom payload during replay");
        VisitResult::Continue
    }

    fn txn_custom_lock(&mut self, id: TxnId, _index: IndexId, _key: &[u8], msg: &[u8]) -> VisitResult {
        tracing::debug!(txn = id.get(), len = msg.len(), "ignoring opaque txn_custom_lock payload during replay");
        VisitResult::Continue
    }
}

impl<S: RecoverySink + 'static> RecoveryVisitor<S> {
    /// Dispatch `op` onto `id`'s lane, pinning it to that txn's
    /// `Locker` so same-txn ops serialize in log order while distinct
    /// txns replay concurrently (§4.11 points 2-3). Missing txns are
    /// skipped under `lenient`, else recorded as a replay failure.
    fn dispatch_on_txn(
        &mut self,
        id: TxnId,
        op: impl FnOnce(&mut Locker, &LockManager, &S) -> Result<()> + Send + 'static,
    ) -> VisitResult {
        if self.has_failed() {
            return VisitResult::Stop;
        }
        let Some(locker_arc) = self.locker_for(id) else {
            if self.lenient {
                return VisitResult::Continue;
            }
            Self::record_failure(&self.failure, Error::illegal_state("redo op for an unknown txn"));
            return VisitResult::Stop;
        };
        let manager = Arc::clone(&self.manager);
        let sink = Arc::clone(&self.sink);
        let failure = Arc::clone(&self.failure);
        let lane = self.lane_for_txn(id);
        self.pool.submit(
            lane,
            Box::new(move || {
                let mut locker = locker_arc.lock();
                if let Err(e) = op(&mut locker, &manager, &sink) {
                    Self::record_failure(&failure, e);
                }
            }),
        );
        VisitResult::Continue
    }
}
