//! Union/intersection/difference over two ordered cursors (§4.9, C9).

use tkv_error::Result;
use tkv_lock::LockResult;

use crate::cursor::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Union,
    Intersection,
    /// Keys present in the left cursor but not the right.
    Difference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
    Both,
}

/// A composition over two ordered [`Cursor`]s (§4.9). `combine` is
/// invoked for a key present on both sides; returning `None` rejects
/// the pair, skipping it without leaking the (temporarily promoted)
/// locks taken to evaluate it.
pub struct MergeCursor<A, B, F> {
    a: A,
    b: B,
    mode: MergeMode,
    combine: F,
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    /// -1 = `a` alone, 0 = both, 1 = `b` alone — matches §4.9's `compare`.
    compare: Option<i8>,
    direction: Option<Direction>,
    last_side: Option<Side>,
    last_lock: Option<LockResult>,
}

impl<A, B, F> MergeCursor<A, B, F>
where
    A: Cursor,
    B: Cursor,
    F: FnMut(&[u8], &[u8], &[u8]) -> Option<Vec<u8>>,
{
    pub fn new(a: A, b: B, mode: MergeMode, combine: F) -> Self {
        tracing::trace!(?mode, "opening merge cursor");
        Self {
            a,
            b,
            mode,
            combine,
            key: None,
            value: None,
            compare: None,
            direction: None,
            last_side: None,
            last_lock: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn compare(&self) -> Option<i8> {
        self.compare
    }

    pub fn take_lock_result(&mut self) -> Option<LockResult> {
        self.last_lock.take()
    }

    /// # Errors
    /// Propagates the child cursors' positioning failures.
    pub fn first(&mut self) -> Result<()> {
        self.a.first()?;
        self.b.first()?;
        self.direction = Some(Direction::Forward);
        self.select_loop(Direction::Forward)
    }

    /// # Errors
    /// Propagates the child cursors' positioning failures.
    pub fn last(&mut self) -> Result<()> {
        self.a.last()?;
        self.b.last()?;
        self.direction = Some(Direction::Backward);
        self.select_loop(Direction::Backward)
    }

    /// # Errors
    /// Propagates the child cursors' positioning failures.
    pub fn next(&mut self) -> Result<()> {
        if self.direction != Some(Direction::Forward) {
            self.realign(Direction::Forward)?;
            self.direction = Some(Direction::Forward);
        }
        self.advance_selected(Direction::Forward)?;
        self.select_loop(Direction::Forward)
    }

    /// # Errors
    /// Propagates the child cursors' positioning failures.
    pub fn previous(&mut self) -> Result<()> {
        if self.direction != Some(Direction::Backward) {
            self.realign(Direction::Backward)?;
            self.direction = Some(Direction::Backward);
        }
        self.advance_selected(Direction::Backward)?;
        self.select_loop(Direction::Backward)
    }

    /// On a direction reversal, the side that was *not* selected last
    /// step is stale relative to the new direction — reposition it
    /// with a scan primitive before re-selecting (§4.9).
    fn realign(&mut self, new_dir: Direction) -> Result<()> {
        let Some(key) = self.key.clone() else { return Ok(()) };
        match (self.last_side, new_dir) {
            (Some(Side::A), Direction::Forward) => self.b.find_near_gt(&key),
            (Some(Side::A), Direction::Backward) => self.b.find_near_lt(&key),
            (Some(Side::B), Direction::Forward) => self.a.find_near_gt(&key),
            (Some(Side::B), Direction::Backward) => self.a.find_near_lt(&key),
            (Some(Side::Both) | None, _) => Ok(()),
        }
    }

    fn advance_selected(&mut self, dir: Direction) -> Result<()> {
        match (self.last_side, dir) {
            (Some(Side::A), Direction::Forward) => self.a.next(),
            (Some(Side::A), Direction::Backward) => self.a.previous(),
            (Some(Side::B), Direction::Forward) => self.b.next(),
            (Some(Side::B), Direction::Backward) => self.b.previous(),
            (Some(Side::Both), Direction::Forward) => {
                self.a.next()?;
                self.b.next()
            }
            (Some(Side::Both), Direction::Backward) => {
                self.a.previous()?;
                self.b.previous()
            }
            (None, _) => Ok(()),
        }
    }

    /// Select the next matching pair for `mode`, skipping keys the
    /// mode excludes (an intersection's unmatched singletons, a
    /// difference's shared keys, a rejected `combine` pair) by
    /// advancing past them and re-selecting.
    fn select_loop(&mut self, dir: Direction) -> Result<()> {
        loop {
            self.select(dir)?;
            let skip = match (self.last_side, self.mode) {
                (None, _) => false,
                (Some(Side::Both), MergeMode::Difference) => true,
                (Some(Side::Both), _) => self.value.is_none(),
                (Some(Side::A), MergeMode::Intersection) => true,
                (Some(Side::B), MergeMode::Intersection | MergeMode::Difference) => true,
                _ => false,
            };
            if !skip {
                break;
            }
            self.advance_selected(dir)?;
        }
        Ok(())
    }

    fn select(&mut self, dir: Direction) -> Result<()> {
        let ak = self.a.key().map(<[u8]>::to_vec);
        let bk = self.b.key().map(<[u8]>::to_vec);

        let selected = match (&ak, &bk) {
            (None, None) => None,
            (Some(_), None) => Some(Side::A),
            (None, Some(_)) => Some(Side::B),
            (Some(ak), Some(bk)) => {
                let cmp = ak.cmp(bk);
                let cmp = if dir == Direction::Backward { cmp.reverse() } else { cmp };
                Some(match cmp {
                    std::cmp::Ordering::Less => Side::A,
                    std::cmp::Ordering::Greater => Side::B,
                    std::cmp::Ordering::Equal => Side::Both,
                })
            }
        };

        self.last_side = selected;
        self.combine_lock_results();

        match selected {
            None => {
                self.key = None;
                self.value = None;
                self.compare = None;
            }
            Some(Side::A) => {
                self.key = ak;
                self.value = self.a.value().map(<[u8]>::to_vec);
                self.compare = Some(-1);
            }
            Some(Side::B) => {
                self.key = bk;
                self.value = self.b.value().map(<[u8]>::to_vec);
                self.compare = Some(1);
            }
            Some(Side::Both) => {
                self.compare = Some(0);
                if self.mode == MergeMode::Difference {
                    self.key = ak;
                    self.value = None;
                } else {
                    let av = self.a.value().expect("a positioned");
                    let bv = self.b.value().expect("b positioned");
                    let k = ak.expect("a positioned");
                    self.value = (self.combine)(&k, av, bv);
                    self.key = Some(k);
                }
            }
        }
        Ok(())
    }

    /// Combine the two children's last lock outcomes by taking the
    /// stronger one (§4.9). Merging same-transaction acquisitions into
    /// a single stack entry (`unlockCombine`) requires the owning
    /// `Locker`, which this crate does not have — `tkv-core` performs
    /// that merge when it owns both the transaction and the cursors.
    fn combine_lock_results(&mut self) {
        let a = self.a.take_lock_result();
        let b = self.b.take_lock_result();
        self.last_lock = match (a, b) {
            (Some(a), Some(b)) => Some(stronger(a, b)),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        };
    }
}

fn rank(r: LockResult) -> u8 {
    match r {
        LockResult::OwnedShared => 0,
        LockResult::Acquired => 1,
        LockResult::OwnedUpgradable => 2,
        LockResult::Upgraded => 3,
        LockResult::OwnedExclusive => 4,
    }
}

fn stronger(a: LockResult, b: LockResult) -> LockResult {
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}
