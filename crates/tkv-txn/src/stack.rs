//! The locker's append-only acquisition stack (§4.6, §9 inline/heap
//! tagged sum).
//!
//! A chain of growing `Block`s stands in for literal pointer-chained
//! blocks: `Vec<Block>` already gives amortized O(1) append/pop and
//! needs no index arena, since unlike the wait-for graph or the dirty
//! list nothing outside this stack ever needs to address a block by id.

use tkv_lock::LockKey;
use tkv_lock::LockMode;

const BLOCK_CAPACITIES: [usize; 4] = [8, 16, 32, 64];

#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) key: LockKey,
    pub(crate) mode: LockMode,
}

struct Block {
    slots: Vec<Slot>,
    /// Bit `i` set means `slots[i]` was an immediate upgrade of a lock
    /// already held by this locker (§4.6) — forbidden from a direct
    /// `unlock()`.
    upgrades: u64,
    capacity: usize,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            upgrades: 0,
            capacity,
        }
    }

    fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    fn push(&mut self, slot: Slot, is_upgrade: bool) {
        let idx = self.slots.len();
        if is_upgrade {
            self.upgrades |= 1 << idx;
        }
        self.slots.push(slot);
    }

    fn pop(&mut self) -> Option<(Slot, bool)> {
        let idx = self.slots.len().checked_sub(1)?;
        let is_upgrade = (self.upgrades >> idx) & 1 == 1;
        self.upgrades &= !(1 << idx);
        self.slots.pop().map(|slot| (slot, is_upgrade))
    }

    fn last(&self) -> Option<(&Slot, bool)> {
        let idx = self.slots.len().checked_sub(1)?;
        let is_upgrade = (self.upgrades >> idx) & 1 == 1;
        Some((&self.slots[idx], is_upgrade))
    }

    fn last_mut(&mut self) -> Option<(&mut Slot, &mut u64, usize)> {
        let idx = self.slots.len().checked_sub(1)?;
        Some((&mut self.slots[idx], &mut self.upgrades, idx))
    }
}

/// `Empty | One(Lock) | Many(Block chain)` (§9).
enum Repr {
    Empty,
    One(Slot, bool),
    Many(Vec<Block>),
}

pub(crate) struct Stack {
    repr: Repr,
}

impl Default for Stack {
    fn default() -> Self {
        Self { repr: Repr::Empty }
    }
}

impl Stack {
    pub(crate) fn len(&self) -> usize {
        match &self.repr {
            Repr::Empty => 0,
            Repr::One(..) => 1,
            Repr::Many(blocks) => blocks.iter().map(|b| b.slots.len()).sum(),
        }
    }

    pub(crate) fn peek(&self) -> Option<(&Slot, bool)> {
        match &self.repr {
            Repr::Empty => None,
            Repr::One(slot, is_upgrade) => Some((slot, *is_upgrade)),
            Repr::Many(blocks) => blocks.last().and_then(Block::last),
        }
    }

    /// Update the top slot's mode/upgrade-flag in place, used by the
    /// `push` dedup rule (§4.6).
    pub(crate) fn set_top(&mut self, mode: LockMode, is_upgrade: bool) {
        match &mut self.repr {
            Repr::Empty => {}
            Repr::One(slot, flag) => {
                slot.mode = mode;
                *flag = is_upgrade;
            }
            Repr::Many(blocks) => {
                if let Some(block) = blocks.last_mut() {
                    if let Some((slot, upgrades, idx)) = block.last_mut() {
                        slot.mode = mode;
                        if is_upgrade {
                            *upgrades |= 1 << idx;
                        } else {
                            *upgrades &= !(1 << idx);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn push(&mut self, key: LockKey, mode: LockMode, is_upgrade: bool) {
        let slot = Slot { key, mode };
        self.repr = match std::mem::replace(&mut self.repr, Repr::Empty) {
            Repr::Empty => Repr::One(slot, is_upgrade),
            Repr::One(prev_slot, prev_upgrade) => {
                let mut block = Block::new(BLOCK_CAPACITIES[0]);
                block.push(prev_slot, prev_upgrade);
                block.push(slot, is_upgrade);
                Repr::Many(vec![block])
            }
            Repr::Many(mut blocks) => {
                let needs_new_block = blocks.last().is_none_or(Block::is_full);
                if needs_new_block {
                    let next_capacity = BLOCK_CAPACITIES
                        .get(blocks.len())
                        .copied()
                        .unwrap_or(*BLOCK_CAPACITIES.last().expect("non-empty"));
                    blocks.push(Block::new(next_capacity));
                }
                blocks.last_mut().expect("just ensured").push(slot, is_upgrade);
                Repr::Many(blocks)
            }
        };
    }

    pub(crate) fn pop(&mut self) -> Option<(Slot, bool)> {
        match &mut self.repr {
            Repr::Empty => None,
            Repr::One(..) => match std::mem::replace(&mut self.repr, Repr::Empty) {
                Repr::One(slot, is_upgrade) => Some((slot, is_upgrade)),
                _ => unreachable!(),
            },
            Repr::Many(blocks) => {
                let popped = blocks.last_mut().and_then(Block::pop);
                while blocks.last().is_some_and(|b| b.slots.is_empty()) {
                    blocks.pop();
                }
                if blocks.is_empty() {
                    self.repr = Repr::Empty;
                } else if blocks.len() == 1 && blocks[0].slots.len() == 1 {
                    let (slot, is_upgrade) = blocks[0].pop().expect("checked len == 1");
                    self.repr = Repr::One(slot, is_upgrade);
                }
                popped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkv_types::IndexId;

    fn k(n: u64) -> LockKey {
        LockKey::new(IndexId::new(1), vec![n as u8])
    }

    #[test]
    fn push_pop_round_trips_through_every_representation() {
        let mut stack = Stack::default();
        for i in 0..20 {
            stack.push(k(i), LockMode::Shared, false);
        }
        assert_eq!(stack.len(), 20);
        for i in (0..20).rev() {
            let (slot, _) = stack.pop().unwrap();
            assert_eq!(slot.key, k(i));
        }
        assert_eq!(stack.len(), 0);
        assert!(stack.peek().is_none());
    }

    #[test]
    fn block_capacities_double_up_to_64() {
        let mut stack = Stack::default();
        for i in 0..100 {
            stack.push(k(i), LockMode::Shared, false);
        }
        assert_eq!(stack.len(), 100);
        // drain and verify order preserved (LIFO)
        for i in (0..100).rev() {
            let (slot, _) = stack.pop().unwrap();
            assert_eq!(slot.key, k(i));
        }
    }
}
