//! Redo record terminator policies (§4.4, §9 open question: fixed at
//! stream-open time and recorded in the file header).

use tkv_types::TerminatorPolicy;

/// Compute the 4-byte terminator for a record whose "current txnId" (the
/// decoder/encoder's running id after processing the record) is
/// `running_id`.
#[must_use]
pub fn compute(policy: TerminatorPolicy, token: u32, running_id: u64) -> u32 {
    match policy {
        TerminatorPolicy::RandomToken => token,
        TerminatorPolicy::TxnIdHash => {
            let hash = xxhash_rust::xxh3::xxh3_64(&running_id.to_le_bytes());
            hash as u32
        }
    }
}

/// Whether `candidate` is an acceptable terminator. Under `lenient`,
/// either policy's value is accepted regardless of the stream's
/// configured policy (§4.4).
#[must_use]
pub fn accepts(token: u32, running_id: u64, lenient: bool, configured: TerminatorPolicy, candidate: u32) -> bool {
    if candidate == compute(configured, token, running_id) {
        return true;
    }
    if lenient {
        let other = match configured {
            TerminatorPolicy::RandomToken => TerminatorPolicy::TxnIdHash,
            TerminatorPolicy::TxnIdHash => TerminatorPolicy::RandomToken,
        };
        return candidate == compute(other, token, running_id);
    }
    false
}
