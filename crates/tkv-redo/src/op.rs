//! The redo operation set (§4.4, §6) and its wire opcode tags.

use tkv_types::{IndexId, TxnId};

/// A single logical redo record. Variant order fixes the wire opcode
/// byte (`tag()`/`from_tag()`) — stable across versions per §4.4, but
/// otherwise implementation-defined, so it is declared once here rather
/// than duplicated at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoOp {
    Reset,
    Timestamp { ts: u64 },
    Shutdown { ts: u64 },
    Close { ts: u64 },
    EndFile { ts: u64 },
    NopRandom { filler: Vec<u8> },
    /// Rebase the decoder's running txn-id counter to `id` directly,
    /// with no visitor notification (§4.4).
    TxnIdReset { id: u64 },
    TxnEnter { id: TxnId },
    TxnRollback { id: TxnId },
    TxnRollbackFinal { id: TxnId },
    TxnCommit { id: TxnId },
    TxnCommitFinal { id: TxnId },
    Store { index: IndexId, key: Vec<u8>, value: Vec<u8> },
    StoreNoLock { index: IndexId, key: Vec<u8>, value: Vec<u8> },
    Delete { index: IndexId, key: Vec<u8> },
    DeleteNoLock { index: IndexId, key: Vec<u8> },
    RenameIndex { id: TxnId, index: IndexId, new_name: Vec<u8> },
    DeleteIndex { id: TxnId, index: IndexId },
    TxnEnterStore { id: TxnId, index: IndexId, key: Vec<u8>, value: Vec<u8> },
    TxnStore { id: TxnId, index: IndexId, key: Vec<u8>, value: Vec<u8> },
    TxnStoreCommit { id: TxnId, index: IndexId, key: Vec<u8>, value: Vec<u8> },
    TxnStoreCommitFinal { id: TxnId, index: IndexId, key: Vec<u8>, value: Vec<u8> },
    TxnEnterDelete { id: TxnId, index: IndexId, key: Vec<u8> },
    TxnDelete { id: TxnId, index: IndexId, key: Vec<u8> },
    TxnDeleteCommit { id: TxnId, index: IndexId, key: Vec<u8> },
    TxnDeleteCommitFinal { id: TxnId, index: IndexId, key: Vec<u8> },
    TxnCustom { id: TxnId, msg: Vec<u8> },
    TxnCustomLock { id: TxnId, index: IndexId, key: Vec<u8>, msg: Vec<u8> },
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Reset = 0,
    Timestamp = 1,
    Shutdown = 2,
    Close = 3,
    EndFile = 4,
    NopRandom = 5,
    TxnIdReset = 6,
    TxnEnter = 7,
    TxnRollback = 8,
    TxnRollbackFinal = 9,
    TxnCommit = 10,
    TxnCommitFinal = 11,
    Store = 12,
    StoreNoLock = 13,
    Delete = 14,
    DeleteNoLock = 15,
    RenameIndex = 16,
    DeleteIndex = 17,
    TxnEnterStore = 18,
    TxnStore = 19,
    TxnStoreCommit = 20,
    TxnStoreCommitFinal = 21,
    TxnEnterDelete = 22,
    TxnDelete = 23,
    TxnDeleteCommit = 24,
    TxnDeleteCommitFinal = 25,
    TxnCustom = 26,
    TxnCustomLock = 27,
}

impl Tag {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Reset,
            1 => Self::Timestamp,
            2 => Self::Shutdown,
            3 => Self::Close,
            4 => Self::EndFile,
            5 => Self::NopRandom,
            6 => Self::TxnIdReset,
            7 => Self::TxnEnter,
            8 => Self::TxnRollback,
            9 => Self::TxnRollbackFinal,
            10 => Self::TxnCommit,
            11 => Self::TxnCommitFinal,
            12 => Self::Store,
            13 => Self::StoreNoLock,
            14 => Self::Delete,
            15 => Self::DeleteNoLock,
            16 => Self::RenameIndex,
            17 => Self::DeleteIndex,
            18 => Self::TxnEnterStore,
            19 => Self::TxnStore,
            20 => Self::TxnStoreCommit,
            21 => Self::TxnStoreCommitFinal,
            22 => Self::TxnEnterDelete,
            23 => Self::TxnDelete,
            24 => Self::TxnDeleteCommit,
            25 => Self::TxnDeleteCommitFinal,
            26 => Self::TxnCustom,
            27 => Self::TxnCustomLock,
            _ => return None,
        })
    }
}

impl RedoOp {
    pub(crate) fn tag(&self) -> Tag {
        match self {
            Self::Reset => Tag::Reset,
            Self::Timestamp { .. } => Tag::Timestamp,
            Self::Shutdown { .. } => Tag::Shutdown,
            Self::Close { .. } => Tag::Close,
            Self::EndFile { .. } => Tag::EndFile,
            Self::NopRandom { .. } => Tag::NopRandom,
            Self::TxnIdReset { .. } => Tag::TxnIdReset,
            Self::TxnEnter { .. } => Tag::TxnEnter,
            Self::TxnRollback { .. } => Tag::TxnRollback,
            Self::TxnRollbackFinal { .. } => Tag::TxnRollbackFinal,
            Self::TxnCommit { .. } => Tag::TxnCommit,
            Self::TxnCommitFinal { .. } => Tag::TxnCommitFinal,
            Self::Store { .. } => Tag::Store,
            Self::StoreNoLock { .. } => Tag::StoreNoLock,
            Self::Delete { .. } => Tag::Delete,
            Self::DeleteNoLock { .. } => Tag::DeleteNoLock,
            Self::RenameIndex { .. } => Tag::RenameIndex,
            Self::DeleteIndex { .. } => Tag::DeleteIndex,
            Self::TxnEnterStore { .. } => Tag::TxnEnterStore,
            Self::TxnStore { .. } => Tag::TxnStore,
            Self::TxnStoreCommit { .. } => Tag::TxnStoreCommit,
            Self::TxnStoreCommitFinal { .. } => Tag::TxnStoreCommitFinal,
            Self::TxnEnterDelete { .. } => Tag::TxnEnterDelete,
            Self::TxnDelete { .. } => Tag::TxnDelete,
            Self::TxnDeleteCommit { .. } => Tag::TxnDeleteCommit,
            Self::TxnDeleteCommitFinal { .. } => Tag::TxnDeleteCommitFinal,
            Self::TxnCustom { .. } => Tag::TxnCustom,
            Self::TxnCustomLock { .. } => Tag::TxnCustomLock,
        }
    }
}
