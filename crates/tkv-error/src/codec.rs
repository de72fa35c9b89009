//! Redo-codec error taxonomy (§4.4, §7 `CorruptRedoLog`).

/// Errors raised while decoding a redo stream.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The 4-byte terminator did not match the configured policy past a
    /// point the decoder considers recoverable.
    #[error("redo terminator mismatch at offset {offset}")]
    TerminatorMismatch { offset: u64 },

    /// An opcode byte did not correspond to any known operation.
    #[error("unknown redo opcode {opcode:#x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u64 },

    /// A varint or fixed-width field was truncated mid-record in a way
    /// that is not a clean end-of-stream (e.g. a length prefix with no
    /// matching payload at all).
    #[error("malformed redo record at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: &'static str },
}
