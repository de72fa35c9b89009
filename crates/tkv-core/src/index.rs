//! The ordered-key storage contract [`ByteIndex`] and the per-index
//! facade the Database API exposes (§6 "Index/View API").

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tkv_error::{Error, Result};
use tkv_lock::{LockKey, LockManager, LockMode, LockResult};
use tkv_types::IndexId;

use crate::txn::Txn;

/// The ordered-page-provider contract a real copy-on-write B-tree would
/// satisfy. [`BTreeIndex`] is an in-memory reference implementation —
/// not a real B-tree, consistent with the Non-goal on storage-engine
/// internals; it exists so `Index`/`MergeCursor` have something real to
/// drive.
pub trait ByteIndex: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: Vec<u8>);
    fn remove(&self, key: &[u8]) -> Option<Vec<u8>>;
    /// A sorted snapshot of every `(key, value)` pair, for cursors to
    /// scan over.
    fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)>;
}

#[derive(Default)]
pub struct BTreeIndex {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl BTreeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteIndex for BTreeIndex {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.rows.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: Vec<u8>) {
        self.rows.write().insert(key.to_vec(), value);
    }

    fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.rows.write().remove(key)
    }

    fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.rows.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// A named, lock-protected view over one [`ByteIndex`] (§6 "Index/View
/// API"). `MergeCursor`'s two child cursors are each drawn from an
/// `Index::new_cursor` call.
pub struct Index {
    id: IndexId,
    store: Arc<dyn ByteIndex>,
    manager: Arc<LockManager>,
}

impl Index {
    #[must_use]
    pub(crate) fn new(id: IndexId, store: Arc<dyn ByteIndex>, manager: Arc<LockManager>) -> Self {
        Self { id, store, manager }
    }

    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    fn key(&self, key: &[u8]) -> LockKey {
        LockKey::new(self.id, key.to_vec())
    }

    /// Read `key` under a shared lock held by `txn`.
    ///
    /// # Errors
    /// Propagates lock-acquisition failures.
    pub fn load(&self, txn: &mut Txn, key: &[u8]) -> Result<Option<Vec<u8>>> {
        txn.lock(&self.manager, LockMode::Shared, self.key(key))?;
        Ok(self.store.get(key))
    }

    /// Acquire a read lock on `key` without loading its value (§6
    /// `touch`).
    ///
    /// # Errors
    /// Propagates lock-acquisition failures.
    pub fn touch(&self, txn: &mut Txn, key: &[u8]) -> Result<LockResult> {
        txn.lock(&self.manager, LockMode::Shared, self.key(key))
    }

    pub fn lock_shared(&self, txn: &mut Txn, key: &[u8]) -> Result<LockResult> {
        txn.lock(&self.manager, LockMode::Shared, self.key(key))
    }

    pub fn lock_upgradable(&self, txn: &mut Txn, key: &[u8]) -> Result<LockResult> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))
    }

    pub fn lock_exclusive(&self, txn: &mut Txn, key: &[u8]) -> Result<LockResult> {
        txn.lock(&self.manager, LockMode::Exclusive, self.key(key))
    }

    /// Upsert `key`.
    ///
    /// # Errors
    /// Propagates lock-acquisition failures.
    pub fn store(&self, txn: &mut Txn, key: &[u8], value: &[u8]) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        txn.record_store(self.id, Arc::clone(&self.store), key, value.to_vec());
        Ok(())
    }

    /// Insert `key`, failing if it already exists.
    ///
    /// # Errors
    /// [`Error::IllegalState`] if `key` is already present, or a lock
    /// failure.
    pub fn insert(&self, txn: &mut Txn, key: &[u8], value: &[u8]) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        if self.store.get(key).is_some() {
            return Err(Error::illegal_state("insert: key already present"));
        }
        txn.record_store(self.id, Arc::clone(&self.store), key, value.to_vec());
        Ok(())
    }

    /// Replace the value at `key`, failing if it does not exist.
    ///
    /// # Errors
    /// [`Error::NoSuchValue`] if `key` is absent, or a lock failure.
    pub fn replace(&self, txn: &mut Txn, key: &[u8], value: &[u8]) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        if self.store.get(key).is_none() {
            return Err(Error::NoSuchValue);
        }
        txn.record_store(self.id, Arc::clone(&self.store), key, value.to_vec());
        Ok(())
    }

    /// Read-modify-write `key` under a single lock acquisition.
    ///
    /// # Errors
    /// Whatever `f` returns, plus lock-acquisition failures.
    pub fn update(&self, txn: &mut Txn, key: &[u8], f: impl FnOnce(Option<&[u8]>) -> Result<Vec<u8>>) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        let current = self.store.get(key);
        let next = f(current.as_deref())?;
        txn.record_store(self.id, Arc::clone(&self.store), key, next);
        Ok(())
    }

    /// Remove `key` if present; a no-op otherwise.
    ///
    /// # Errors
    /// Propagates lock-acquisition failures.
    pub fn delete(&self, txn: &mut Txn, key: &[u8]) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        txn.record_delete(self.id, Arc::clone(&self.store), key);
        Ok(())
    }

    /// Remove `key`, failing if it is not present.
    ///
    /// # Errors
    /// [`Error::NoSuchValue`] if `key` is absent, or a lock failure.
    pub fn remove(&self, txn: &mut Txn, key: &[u8]) -> Result<()> {
        txn.lock(&self.manager, LockMode::Upgradable, self.key(key))?;
        if self.store.get(key).is_none() {
            return Err(Error::NoSuchValue);
        }
        txn.record_delete(self.id, Arc::clone(&self.store), key);
        Ok(())
    }

    /// A cursor over a snapshot of this index, taken under `txn`'s
    /// locker as it moves (§6 "Index/View API" `new_cursor`).
    #[must_use]
    pub fn new_cursor(&self, txn: &Txn) -> crate::cursor::IndexCursor {
        crate::cursor::IndexCursor::new(self.id, self.store.snapshot(), Arc::clone(&self.manager), txn.locker_handle())
    }
}
