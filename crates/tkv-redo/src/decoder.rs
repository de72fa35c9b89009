//! Redo record decoder (§4.4).

use tkv_error::{CodecError, Error, Result};
use tkv_types::{IndexId, TerminatorPolicy, TxnId};

use crate::op::Tag;
use crate::varint::{read_bytes, read_i64, read_u64};
use crate::visitor::{RedoVisitor, VisitResult};

/// Outcome of decoding one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A record was decoded and the visitor was driven; carries the
    /// last [`VisitResult`] produced (a compound opcode may have fired
    /// two calls — only the final, possibly short-circuited, result is
    /// reported).
    Produced(VisitResult),
    /// Not enough bytes remained to complete a record. Tolerated as a
    /// normal end of stream, not corruption (§4.4).
    CleanEof,
}

/// A record's payload, parsed but not yet dispatched. Kept separate
/// from the visitor calls it will eventually drive so a record whose
/// terminator is missing or invalid can be discarded with zero visitor
/// effect and no `running_id` update — see [`RedoDecoder::decode_one`].
enum Fields<'a> {
    Reset,
    Timestamp(u64),
    Shutdown(u64),
    Close(u64),
    EndFile(u64),
    NopRandom(&'a [u8]),
    TxnIdReset,
    TxnEnter(TxnId),
    TxnRollback(TxnId),
    TxnRollbackFinal(TxnId),
    TxnCommit(TxnId),
    TxnCommitFinal(TxnId),
    Store(IndexId, &'a [u8], &'a [u8]),
    StoreNoLock(IndexId, &'a [u8], &'a [u8]),
    Delete(IndexId, &'a [u8]),
    DeleteNoLock(IndexId, &'a [u8]),
    RenameIndex(TxnId, IndexId, &'a [u8]),
    DeleteIndex(TxnId, IndexId),
    TxnEnterStore(TxnId, IndexId, &'a [u8], &'a [u8]),
    TxnStore(TxnId, IndexId, &'a [u8], &'a [u8]),
    TxnStoreCommit(TxnId, IndexId, &'a [u8], &'a [u8]),
    TxnStoreCommitFinal(TxnId, IndexId, &'a [u8], &'a [u8]),
    TxnEnterDelete(TxnId, IndexId, &'a [u8]),
    TxnDelete(TxnId, IndexId, &'a [u8]),
    TxnDeleteCommit(TxnId, IndexId, &'a [u8]),
    TxnDeleteCommitFinal(TxnId, IndexId, &'a [u8]),
    TxnCustom(TxnId, &'a [u8]),
    TxnCustomLock(TxnId, IndexId, &'a [u8], &'a [u8]),
}

pub struct RedoDecoder {
    policy: TerminatorPolicy,
    token: u32,
    lenient: bool,
    running_id: u64,
}

impl RedoDecoder {
    #[must_use]
    pub fn new(policy: TerminatorPolicy, token: u32, lenient: bool) -> Self {
        Self {
            policy,
            token,
            lenient,
            running_id: 0,
        }
    }

    #[must_use]
    pub fn running_id(&self) -> u64 {
        self.running_id
    }

    /// Decode and dispatch every complete record in `data` starting at
    /// `*pos`, stopping at a [`VisitResult::Stop`], a clean EOF, or an
    /// error.
    ///
    /// # Errors
    /// See [`RedoDecoder::decode_one`].
    pub fn decode_all(
        &mut self,
        data: &[u8],
        pos: &mut usize,
        visitor: &mut dyn RedoVisitor,
    ) -> Result<usize> {
        let mut count = 0usize;
        loop {
            match self.decode_one(data, pos, visitor)? {
                Step::CleanEof => return Ok(count),
                Step::Produced(result) => {
                    count += 1;
                    if result.should_stop() {
                        return Ok(count);
                    }
                }
            }
        }
    }

    /// Decode one record at `*pos`, advancing it past the record on
    /// success. `*pos` is left unchanged on [`Step::CleanEof`].
    ///
    /// Parses the full payload and the terminator *before* touching
    /// `running_id` or the visitor: a torn tail (valid opcode, payload
    /// present, terminator short or invalid — exactly what §4.4 asks
    /// decoders to tolerate) must leave no trace, not a partially
    /// applied one.
    ///
    /// # Errors
    /// [`Error::CorruptRedoLog`] if an opcode byte is unrecognized or a
    /// fully-present terminator fails validation.
    pub fn decode_one(
        &mut self,
        data: &[u8],
        pos: &mut usize,
        visitor: &mut dyn RedoVisitor,
    ) -> Result<Step> {
        let start = *pos;
        let mut cursor = start;

        let Some(&opcode_byte) = data.get(cursor) else {
            return Ok(Step::CleanEof);
        };
        cursor += 1;

        let Some(tag) = Tag::from_byte(opcode_byte) else {
            tracing::warn!(opcode = opcode_byte, offset = start as u64, "unknown redo opcode");
            return Err(Error::CorruptRedoLog(CodecError::UnknownOpcode {
                opcode: opcode_byte,
                offset: start as u64,
            }));
        };

        let mut running_id = self.running_id;
        let Some(fields) = read_fields(tag, data, &mut cursor, &mut running_id) else {
            return Ok(Step::CleanEof);
        };
        let terminator_at = cursor;

        let Some(term_bytes) = data.get(terminator_at..terminator_at + 4) else {
            return Ok(Step::CleanEof);
        };
        let candidate = u32::from_le_bytes(term_bytes.try_into().expect("checked length"));
        if !crate::terminator::accepts(self.token, running_id, self.lenient, self.policy, candidate) {
            tracing::warn!(offset = start as u64, "redo record terminator mismatch");
            return Err(Error::CorruptRedoLog(CodecError::TerminatorMismatch {
                offset: start as u64,
            }));
        }

        self.running_id = running_id;
        let result = dispatch(fields, visitor);
        *pos = terminator_at + 4;
        Ok(Step::Produced(result))
    }
}

/// Parse one record's fields at `*cursor`, threading `running_id`
/// through any txn-id delta without committing it to the decoder —
/// the caller only adopts the returned value once the terminator that
/// follows has been checked.
fn read_fields<'a>(tag: Tag, data: &'a [u8], cursor: &mut usize, running_id: &mut u64) -> Option<Fields<'a>> {
    Some(match tag {
        Tag::Reset => {
            *running_id = 0;
            Fields::Reset
        }
        Tag::Timestamp => Fields::Timestamp(read_u64(data, cursor)?),
        Tag::Shutdown => Fields::Shutdown(read_u64(data, cursor)?),
        Tag::Close => Fields::Close(read_u64(data, cursor)?),
        Tag::EndFile => Fields::EndFile(read_u64(data, cursor)?),
        Tag::NopRandom => Fields::NopRandom(read_bytes(data, cursor)?),
        Tag::TxnIdReset => {
            *running_id = read_u64(data, cursor)?;
            Fields::TxnIdReset
        }
        Tag::TxnEnter => Fields::TxnEnter(read_txn_id(running_id, data, cursor)?),
        Tag::TxnRollback => Fields::TxnRollback(read_txn_id(running_id, data, cursor)?),
        Tag::TxnRollbackFinal => Fields::TxnRollbackFinal(read_txn_id(running_id, data, cursor)?),
        Tag::TxnCommit => Fields::TxnCommit(read_txn_id(running_id, data, cursor)?),
        Tag::TxnCommitFinal => Fields::TxnCommitFinal(read_txn_id(running_id, data, cursor)?),
        Tag::Store => {
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::Store(index, key, value)
        }
        Tag::StoreNoLock => {
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::StoreNoLock(index, key, value)
        }
        Tag::Delete => {
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::Delete(index, key)
        }
        Tag::DeleteNoLock => {
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::DeleteNoLock(index, key)
        }
        Tag::RenameIndex => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let new_name = read_bytes(data, cursor)?;
            Fields::RenameIndex(id, index, new_name)
        }
        Tag::DeleteIndex => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            Fields::DeleteIndex(id, index)
        }
        Tag::TxnEnterStore => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::TxnEnterStore(id, index, key, value)
        }
        Tag::TxnStore => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::TxnStore(id, index, key, value)
        }
        Tag::TxnStoreCommit => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::TxnStoreCommit(id, index, key, value)
        }
        Tag::TxnStoreCommitFinal => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let value = read_bytes(data, cursor)?;
            Fields::TxnStoreCommitFinal(id, index, key, value)
        }
        Tag::TxnEnterDelete => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::TxnEnterDelete(id, index, key)
        }
        Tag::TxnDelete => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::TxnDelete(id, index, key)
        }
        Tag::TxnDeleteCommit => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::TxnDeleteCommit(id, index, key)
        }
        Tag::TxnDeleteCommitFinal => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            Fields::TxnDeleteCommitFinal(id, index, key)
        }
        Tag::TxnCustom => {
            let id = read_txn_id(running_id, data, cursor)?;
            let msg = read_bytes(data, cursor)?;
            Fields::TxnCustom(id, msg)
        }
        Tag::TxnCustomLock => {
            let id = read_txn_id(running_id, data, cursor)?;
            let index = IndexId::new(read_u64(data, cursor)?);
            let key = read_bytes(data, cursor)?;
            let msg = read_bytes(data, cursor)?;
            Fields::TxnCustomLock(id, index, key, msg)
        }
    })
}

/// `None` covers both truncation and a decoded-but-zero id; the latter
/// cannot occur in a well-formed stream (txn ids are never zero), so
/// both are folded into the same clean-EOF treatment by callers rather
/// than a separate corruption variant.
fn read_txn_id(running_id: &mut u64, data: &[u8], cursor: &mut usize) -> Option<TxnId> {
    let delta = read_i64(data, cursor)?;
    let absolute = (*running_id as i64).checked_add(delta)?;
    *running_id = absolute as u64;
    TxnId::new(*running_id)
}

/// Drive the visitor with an already-parsed, terminator-confirmed
/// record. Compound opcodes fire their calls in encoded order and stop
/// as soon as one returns `Stop` (§4.4).
fn dispatch(fields: Fields<'_>, visitor: &mut dyn RedoVisitor) -> VisitResult {
    match fields {
        Fields::Reset => visitor.reset(),
        Fields::Timestamp(ts) => visitor.timestamp(ts),
        Fields::Shutdown(ts) => visitor.shutdown(ts),
        Fields::Close(ts) => visitor.close(ts),
        Fields::EndFile(ts) => visitor.end_file(ts),
        Fields::NopRandom(n) => visitor.nop_random(n),
        Fields::TxnIdReset => VisitResult::Continue,
        Fields::TxnEnter(id) => visitor.txn_enter(id),
        Fields::TxnRollback(id) => visitor.txn_rollback(id),
        Fields::TxnRollbackFinal(id) => visitor.txn_rollback_final(id),
        Fields::TxnCommit(id) => visitor.txn_commit(id),
        Fields::TxnCommitFinal(id) => visitor.txn_commit_final(id),
        Fields::Store(index, key, value) => visitor.store(index, key, value),
        Fields::StoreNoLock(index, key, value) => visitor.store_no_lock(index, key, value),
        Fields::Delete(index, key) => visitor.delete(index, key),
        Fields::DeleteNoLock(index, key) => visitor.delete_no_lock(index, key),
        Fields::RenameIndex(id, index, new_name) => visitor.rename_index(id, index, new_name),
        Fields::DeleteIndex(id, index) => visitor.delete_index(id, index),
        Fields::TxnEnterStore(id, index, key, value) => {
            let first = visitor.txn_enter(id);
            if first.should_stop() {
                first
            } else {
                visitor.txn_store(id, index, key, value)
            }
        }
        Fields::TxnStore(id, index, key, value) => visitor.txn_store(id, index, key, value),
        Fields::TxnStoreCommit(id, index, key, value) => {
            let first = visitor.txn_store(id, index, key, value);
            if first.should_stop() {
                first
            } else {
                visitor.txn_commit(id)
            }
        }
        Fields::TxnStoreCommitFinal(id, index, key, value) => {
            let first = visitor.txn_store(id, index, key, value);
            if first.should_stop() {
                first
            } else {
                visitor.txn_commit_final(id)
            }
        }
        Fields::TxnEnterDelete(id, index, key) => {
            let first = visitor.txn_enter(id);
            if first.should_stop() {
                first
            } else {
                visitor.txn_delete(id, index, key)
            }
        }
        Fields::TxnDelete(id, index, key) => visitor.txn_delete(id, index, key),
        Fields::TxnDeleteCommit(id, index, key) => {
            let first = visitor.txn_delete(id, index, key);
            if first.should_stop() {
                first
            } else {
                visitor.txn_commit(id)
            }
        }
        Fields::TxnDeleteCommitFinal(id, index, key) => {
            let first = visitor.txn_delete(id, index, key);
            if first.should_stop() {
                first
            } else {
                visitor.txn_commit_final(id)
            }
        }
        Fields::TxnCustom(id, msg) => visitor.txn_custom(id, msg),
        Fields::TxnCustomLock(id, index, key, msg) => visitor.txn_custom_lock(id, index, key, msg),
    }
}
