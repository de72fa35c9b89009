//! Redo record encoder (§4.4).

use tkv_types::TerminatorPolicy;

use crate::op::RedoOp;
use crate::varint::{write_bytes, write_i64, write_u64};

/// Encodes [`RedoOp`]s to a byte stream, tracking the running txn-id
/// counter that delta-encoding and the `TxnIdHash` terminator policy
/// both depend on.
pub struct RedoEncoder {
    policy: TerminatorPolicy,
    token: u32,
    running_id: u64,
}

impl RedoEncoder {
    #[must_use]
    pub fn new(policy: TerminatorPolicy, token: u32) -> Self {
        Self {
            policy,
            token,
            running_id: 0,
        }
    }

    #[must_use]
    pub fn running_id(&self) -> u64 {
        self.running_id
    }

    /// Encode `op`, appending `opcode(1) | payload | terminator(4)` to
    /// `out` (§3 "Redo operation").
    pub fn encode(&mut self, op: &RedoOp, out: &mut Vec<u8>) {
        out.push(op.tag() as u8);

        match op {
            RedoOp::Reset => {
                self.running_id = 0;
            }
            RedoOp::Timestamp { ts }
            | RedoOp::Shutdown { ts }
            | RedoOp::Close { ts }
            | RedoOp::EndFile { ts } => write_u64(out, *ts),
            RedoOp::NopRandom { filler } => write_bytes(out, filler),
            RedoOp::TxnIdReset { id } => {
                write_u64(out, *id);
                self.running_id = *id;
            }
            RedoOp::TxnEnter { id }
            | RedoOp::TxnRollback { id }
            | RedoOp::TxnRollbackFinal { id }
            | RedoOp::TxnCommit { id }
            | RedoOp::TxnCommitFinal { id } => self.write_txn_id(out, id.get()),
            RedoOp::Store { index, key, value } | RedoOp::StoreNoLock { index, key, value } => {
                write_u64(out, index.get());
                write_bytes(out, key);
                write_bytes(out, value);
            }
            RedoOp::Delete { index, key } | RedoOp::DeleteNoLock { index, key } => {
                write_u64(out, index.get());
                write_bytes(out, key);
            }
            RedoOp::RenameIndex { id, index, new_name } => {
                self.write_txn_id(out, id.get());
                write_u64(out, index.get());
                write_bytes(out, new_name);
            }
            RedoOp::DeleteIndex { id, index } => {
                self.write_txn_id(out, id.get());
                write_u64(out, index.get());
            }
            RedoOp::TxnEnterStore { id, index, key, value }
            | RedoOp::TxnStore { id, index, key, value }
            | RedoOp::TxnStoreCommit { id, index, key, value }
            | RedoOp::TxnStoreCommitFinal { id, index, key, value } => {
                self.write_txn_id(out, id.get());
                write_u64(out, index.get());
                write_bytes(out, key);
                write_bytes(out, value);
            }
            RedoOp::TxnEnterDelete { id, index, key }
            | RedoOp::TxnDelete { id, index, key }
            | RedoOp::TxnDeleteCommit { id, index, key }
            | RedoOp::TxnDeleteCommitFinal { id, index, key } => {
                self.write_txn_id(out, id.get());
                write_u64(out, index.get());
                write_bytes(out, key);
            }
            RedoOp::TxnCustom { id, msg } => {
                self.write_txn_id(out, id.get());
                write_bytes(out, msg);
            }
            RedoOp::TxnCustomLock { id, index, key, msg } => {
                self.write_txn_id(out, id.get());
                write_u64(out, index.get());
                write_bytes(out, key);
                write_bytes(out, msg);
            }
        }

        let terminator = crate::terminator::compute(self.policy, self.token, self.running_id);
        out.extend_from_slice(&terminator.to_le_bytes());
    }

    fn write_txn_id(&mut self, out: &mut Vec<u8>, absolute: u64) {
        let delta = absolute as i64 - self.running_id as i64;
        write_i64(out, delta);
        self.running_id = absolute;
    }
}
