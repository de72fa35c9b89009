//! Decoder visitor (§4.4, §9 Design Notes: "model as a trait with
//! methods returning a `Continue|Stop` enum").

use tkv_types::{IndexId, TxnId};

/// Whether the decoder should keep driving the visitor or stop after
/// the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    Stop,
}

impl VisitResult {
    #[must_use]
    pub fn should_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// One callback per atomic redo action. Compound wire opcodes (e.g.
/// `TXN_ENTER_STORE`) are decoded by firing two of these calls in the
/// encoded order, short-circuiting on the first [`VisitResult::Stop`]
/// (§4.4 "compound opcodes... must fire the visitor calls in the
/// encoded order and stop as soon as any returns `Stop`").
pub trait RedoVisitor {
    fn reset(&mut self) -> VisitResult {
        VisitResult::Continue
    }
    fn timestamp(&mut self, _ts: u64) -> VisitResult {
        VisitResult::Continue
    }
    fn shutdown(&mut self, _ts: u64) -> VisitResult {
        VisitResult::Continue
    }
    fn close(&mut self, _ts: u64) -> VisitResult {
        VisitResult::Continue
    }
    fn end_file(&mut self, _ts: u64) -> VisitResult {
        VisitResult::Continue
    }
    fn nop_random(&mut self, _filler: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_enter(&mut self, _id: TxnId) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_rollback(&mut self, _id: TxnId) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_rollback_final(&mut self, _id: TxnId) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_commit(&mut self, _id: TxnId) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_commit_final(&mut self, _id: TxnId) -> VisitResult {
        VisitResult::Continue
    }
    fn store(&mut self, _index: IndexId, _key: &[u8], _value: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn store_no_lock(&mut self, _index: IndexId, _key: &[u8], _value: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn delete(&mut self, _index: IndexId, _key: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn delete_no_lock(&mut self, _index: IndexId, _key: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn rename_index(&mut self, _id: TxnId, _index: IndexId, _new_name: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn delete_index(&mut self, _id: TxnId, _index: IndexId) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_store(&mut self, _id: TxnId, _index: IndexId, _key: &[u8], _value: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_delete(&mut self, _id: TxnId, _index: IndexId, _key: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_custom(&mut self, _id: TxnId, _msg: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
    fn txn_custom_lock(&mut self, _id: TxnId, _index: IndexId, _key: &[u8], _msg: &[u8]) -> VisitResult {
        VisitResult::Continue
    }
}
