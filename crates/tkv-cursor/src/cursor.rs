//! The ordered-cursor seam [`crate::MergeCursor`] composes over (§4.9,
//! §6 Cursor API). `tkv-core` implements this trait over a real index;
//! [`VecCursor`] is a reference implementation used by tests here.

use tkv_error::Result;
use tkv_lock::LockResult;

/// A single-key-at-a-time ordered cursor. Only the positioning and
/// value-access surface [`crate::MergeCursor`] needs is modeled here —
/// not the full §6 Cursor API (random access, `skip`, `copy`, ...),
/// which is out of scope for this crate.
pub trait Cursor {
    /// Errors
    /// Propagates the underlying index's positioning failures.
    fn first(&mut self) -> Result<()>;
    fn last(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn previous(&mut self) -> Result<()>;

    /// Position at the smallest key strictly greater than `key`.
    fn find_near_gt(&mut self, key: &[u8]) -> Result<()>;
    /// Position at the largest key strictly less than `key`.
    fn find_near_lt(&mut self, key: &[u8]) -> Result<()>;

    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;

    /// Consume the lock outcome of the most recent positioning call,
    /// if the cursor's underlying index acquires locks as it moves.
    fn take_lock_result(&mut self) -> Option<LockResult>;
}

/// A sorted in-memory [`Cursor`] for tests and as a reference
/// implementation for callers with no backing index.
pub struct VecCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
    lock_result: Option<LockResult>,
}

impl VecCursor {
    /// `entries` must already be sorted by key.
    #[must_use]
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries,
            pos: None,
            lock_result: None,
        }
    }

    fn set_pos(&mut self, pos: Option<usize>) {
        self.pos = pos;
        self.lock_result = self.pos.map(|_| LockResult::OwnedShared);
    }
}

impl Cursor for VecCursor {
    fn first(&mut self) -> Result<()> {
        let pos = if self.entries.is_empty() { None } else { Some(0) };
        self.set_pos(pos);
        Ok(())
    }

    fn last(&mut self) -> Result<()> {
        let pos = self.entries.len().checked_sub(1);
        self.set_pos(pos);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let pos = match self.pos {
            Some(p) if p + 1 < self.entries.len() => Some(p + 1),
            _ => None,
        };
        self.set_pos(pos);
        Ok(())
    }

    fn previous(&mut self) -> Result<()> {
        let pos = match self.pos {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        };
        self.set_pos(pos);
        Ok(())
    }

    fn find_near_gt(&mut self, key: &[u8]) -> Result<()> {
        let pos = self.entries.iter().position(|(k, _)| k.as_slice() > key);
        self.set_pos(pos);
        Ok(())
    }

    fn find_near_lt(&mut self, key: &[u8]) -> Result<()> {
        let pos = self.entries.iter().rposition(|(k, _)| k.as_slice() < key);
        self.set_pos(pos);
        Ok(())
    }

    fn key(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].0.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].1.as_slice())
    }

    fn take_lock_result(&mut self) -> Option<LockResult> {
        self.lock_result.take()
    }
}
