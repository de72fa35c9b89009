//! The top-level facade (§6 "Database API"): opens indexes, mints
//! transactions, and replays the redo log it has accumulated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::Result;
use tkv_lock::LockManager;
use tkv_recovery::RecoverySink;
use tkv_types::{DatabaseConfig, IndexId, TxnId};

use crate::index::{BTreeIndex, ByteIndex, Index};
use crate::txn::Txn;

struct Inner {
    config: DatabaseConfig,
    manager: Arc<LockManager>,
    indexes: Mutex<HashMap<IndexId, Arc<dyn ByteIndex>>>,
    names: Mutex<HashMap<Vec<u8>, IndexId>>,
    redo_log: Mutex<Vec<u8>>,
    next_index_id: AtomicU64,
    next_txn_id: AtomicU64,
    redo_token: u32,
}

/// Applies replayed ops directly to this database's live indexes — the
/// same map `index_by_id` reads from, so a successful [`Database::recover`]
/// leaves the database in exactly the state a fresh open-and-replay
/// would have produced.
impl RecoverySink for Inner {
    fn apply_store(&self, index: IndexId, key: &[u8], value: &[u8]) -> Result<()> {
        self.store_for(index).put(key, value.to_vec());
        Ok(())
    }

    fn apply_delete(&self, index: IndexId, key: &[u8]) -> Result<()> {
        self.store_for(index).remove(key);
        Ok(())
    }

    fn apply_rename_index(&self, index: IndexId, new_name: &[u8]) -> Result<()> {
        self.names.lock().retain(|_, v| *v != index);
        self.names.lock().insert(new_name.to_vec(), index);
        Ok(())
    }

    fn apply_delete_index(&self, index: IndexId) -> Result<()> {
        self.indexes.lock().remove(&index);
        self.names.lock().retain(|_, v| *v != index);
        Ok(())
    }
}

impl Inner {
    /// Fetch (and lazily create) the `ByteIndex` backing `index` — redo
    /// ops can reference an index that predates the current process's
    /// view of `indexes` (e.g. a fresh, empty database replaying a log
    /// from an earlier run).
    fn store_for(&self, index: IndexId) -> Arc<dyn ByteIndex> {
        Arc::clone(
            self.indexes
                .lock()
                .entry(index)
                .or_insert_with(|| Arc::new(BTreeIndex::new()) as Arc<dyn ByteIndex>),
        )
    }
}

/// An open database (§6 "Database API"). Cheaply cloneable — every
/// clone shares the same indexes, lock manager, and redo log.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open (or, here, construct in memory) a database under `config`
    /// (§6 `Database.open`).
    #[must_use]
    pub fn open(config: DatabaseConfig) -> Self {
        let manager = Arc::new(LockManager::new(config.lock_upgrade_rule));
        let redo_token = rand::random();
        Self {
            inner: Arc::new(Inner {
                config,
                manager,
                indexes: Mutex::new(HashMap::new()),
                names: Mutex::new(HashMap::new()),
                redo_log: Mutex::new(Vec::new()),
                next_index_id: AtomicU64::new(1),
                next_txn_id: AtomicU64::new(1),
                redo_token,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Create a new, empty index and give it `name`.
    #[must_use]
    pub fn create_index(&self, name: &[u8]) -> IndexId {
        let raw = self.inner.next_index_id.fetch_add(1, Ordering::Relaxed);
        let id = IndexId::new(raw);
        self.inner.indexes.lock().insert(id, Arc::new(BTreeIndex::new()));
        self.inner.names.lock().insert(name.to_vec(), id);
        id
    }

    #[must_use]
    pub fn index_by_id(&self, id: IndexId) -> Option<Index> {
        let store = self.inner.indexes.lock().get(&id).cloned()?;
        Some(Index::new(id, store, Arc::clone(&self.inner.manager)))
    }

    #[must_use]
    pub fn index_by_name(&self, name: &[u8]) -> Option<Index> {
        let id = *self.inner.names.lock().get(name)?;
        self.index_by_id(id)
    }

    /// Begin a new transaction (§6 `new_transaction`).
    #[must_use]
    pub fn new_transaction(&self, durability: tkv_types::DurabilityMode) -> Txn {
        let raw = self.inner.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let id = TxnId::new(raw).expect("txn id counter starts at 1 and only increases");
        tracing::trace!(txn = raw, ?durability, "new_transaction");
        Txn::new(id, durability, self.inner.config.terminator_policy, self.inner.redo_token)
    }

    /// Commit `txn`: drain its locks and append its redo bytes to the
    /// durable stream (§4.6, §4.4).
    ///
    /// # Errors
    /// Propagates lock-release failures.
    pub fn commit(&self, txn: Txn) -> Result<()> {
        let redo = txn.commit(&self.inner.manager)?;
        self.inner.redo_log.lock().extend_from_slice(&redo);
        Ok(())
    }

    /// Roll back `txn`: undo its writes, drain its locks, and append a
    /// rollback marker to the durable stream.
    ///
    /// # Errors
    /// Propagates lock-release failures.
    pub fn rollback(&self, txn: Txn) -> Result<()> {
        let redo = txn.rollback(&self.inner.manager)?;
        self.inner.redo_log.lock().extend_from_slice(&redo);
        Ok(())
    }

    /// No-op placeholders over the page store's durability triggers
    /// (§6 `sync`/`flush`/`checkpoint`) — `tkv-pager`/`tkv-pageio`
    /// already implement the real flush/checkpoint machinery standalone;
    /// this facade's `BTreeIndex` has no page cache to flush, so these
    /// exist only so callers coded against the full Database API have
    /// something to call.
    pub fn sync(&self) {
        tracing::debug!("sync: no page cache backs this facade's indexes");
    }

    pub fn flush(&self) {
        tracing::debug!("flush: no page cache backs this facade's indexes");
    }

    pub fn checkpoint(&self) {
        tracing::debug!("checkpoint: no page cache backs this facade's indexes");
    }

    /// Replay this database's own accumulated redo log back into its
    /// indexes (§4.11). Exercises `tkv-recovery` end to end against a
    /// live `Database` rather than only against `MapSink` in that
    /// crate's own tests.
    ///
    /// # Errors
    /// The first error raised by any replayed op.
    pub fn recover(&self, lenient: bool) -> Result<usize> {
        let data = self.inner.redo_log.lock().clone();
        tkv_recovery::replay(
            &data,
            self.inner.config.terminator_policy,
            self.inner.redo_token,
            lenient,
            Arc::clone(&self.inner.manager),
            Arc::clone(&self.inner),
            Some(self.inner.config.max_replica_threads),
        )
    }
}
