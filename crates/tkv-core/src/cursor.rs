//! [`tkv_cursor::Cursor`] over a live [`crate::index::Index`] snapshot,
//! acquiring a shared lock on every key it lands on (§6 "Cursor API").

use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::Result;
use tkv_lock::{LockKey, LockManager, LockMode, LockResult};
use tkv_txn::Locker;
use tkv_types::IndexId;

/// A sorted-snapshot cursor over one [`crate::index::Index`], sharing
/// its owning transaction's [`Locker`] so keys it visits are tracked
/// and released the same way any other acquisition is (§6 `link`).
pub struct IndexCursor {
    index: IndexId,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
    manager: Arc<LockManager>,
    locker: Arc<Mutex<Locker>>,
    last_lock: Option<LockResult>,
}

impl IndexCursor {
    pub(crate) fn new(
        index: IndexId,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        manager: Arc<LockManager>,
        locker: Arc<Mutex<Locker>>,
    ) -> Self {
        Self { index, entries, pos: None, manager, locker, last_lock: None }
    }

    fn settle(&mut self, pos: Option<usize>) -> Result<()> {
        self.pos = pos;
        self.last_lock = match pos {
            Some(p) => {
                let key = LockKey::new(self.index, self.entries[p].0.clone());
                let mut locker = self.locker.lock();
                let result = self.manager.try_lock(LockMode::Shared, locker.id(), key.clone(), None)?;
                locker.push(key, LockMode::Shared, matches!(result, LockResult::Upgraded));
                Some(result)
            }
            None => None,
        };
        Ok(())
    }
}

impl tkv_cursor::Cursor for IndexCursor {
    fn first(&mut self) -> Result<()> {
        let pos = if self.entries.is_empty() { None } else { Some(0) };
        self.settle(pos)
    }

    fn last(&mut self) -> Result<()> {
        let pos = self.entries.len().checked_sub(1);
        self.settle(pos)
    }

    fn next(&mut self) -> Result<()> {
        let pos = match self.pos {
            Some(p) if p + 1 < self.entries.len() => Some(p + 1),
            _ => None,
        };
        self.settle(pos)
    }

    fn previous(&mut self) -> Result<()> {
        let pos = match self.pos {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        };
        self.settle(pos)
    }

    fn find_near_gt(&mut self, key: &[u8]) -> Result<()> {
        let pos = self.entries.iter().position(|(k, _)| k.as_slice() > key);
        self.settle(pos)
    }

    fn find_near_lt(&mut self, key: &[u8]) -> Result<()> {
        let pos = self.entries.iter().rposition(|(k, _)| k.as_slice() < key);
        self.settle(pos)
    }

    fn key(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].0.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].1.as_slice())
    }

    fn take_lock_result(&mut self) -> Option<LockResult> {
        self.last_lock.take()
    }
}
