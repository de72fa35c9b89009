//! Redo-log replay driving a per-txn-pinned worker pool (§4.11, C11).
//!
//! [`replay`] decodes a redo stream with [`tkv_redo::RedoDecoder`] and
//! dispatches every op onto [`RecoveryVisitor`], which fans work out
//! across [`RecoveryPool`] lanes: same-txn ops stay pinned to one lane
//! (preserving their log order), independent txns replay concurrently.

mod pool;
mod sink;
mod visitor;

pub use pool::RecoveryPool;
pub use sink::{MapSink, RecoverySink};
pub use visitor::RecoveryVisitor;

use std::sync::Arc;

use tkv_error::Result;
use tkv_lock::LockManager;
use tkv_redo::RedoDecoder;
use tkv_types::TerminatorPolicy;

/// Replay every record in `data` against `sink`, using `manager` to
/// reacquire the locks each transaction held at crash time.
///
/// `max_threads` bounds the pool's lane count (`None` defers to
/// `num_cpus::get()`); `lenient` tolerates a truncated tail and redo
/// ops that reference an unknown txn id, matching [`RedoDecoder`]'s own
/// leniency knob.
///
/// # Errors
/// The first error raised by any replayed op, or a corrupt-log error
/// from the decoder itself.
pub fn replay<S: RecoverySink + 'static>(
    data: &[u8],
    policy: TerminatorPolicy,
    token: u32,
    lenient: bool,
    manager: Arc<LockManager>,
    sink: Arc<S>,
    max_threads: Option<usize>,
) -> Result<usize> {
    let max_threads = max_threads.unwrap_or_else(num_cpus::get);
    let mut visitor = RecoveryVisitor::new(manager, sink, max_threads, lenient);
    let mut decoder = RedoDecoder::new(policy, token, lenient);
    let mut pos = 0usize;
    let count = decoder.decode_all(data, &mut pos, &mut visitor)?;
    visitor.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tkv_lock::LockUpgradeRule;
    use tkv_redo::{RedoEncoder, RedoOp};
    use tkv_types::{IndexId, TxnId};

    const POLICY: TerminatorPolicy = TerminatorPolicy::RandomToken;
    const TOKEN: u32 = 7;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::with_stripe_count(4, LockUpgradeRule::Strict))
    }

    fn idx(n: u64) -> IndexId {
        IndexId::new(n)
    }

    fn txn(n: u64) -> TxnId {
        TxnId::new(n).unwrap()
    }

    fn encode(ops: &[RedoOp]) -> Vec<u8> {
        let mut enc = RedoEncoder::new(POLICY, TOKEN);
        let mut out = Vec::new();
        for op in ops {
            enc.encode(op, &mut out);
        }
        out
    }

    #[test]
    fn replays_a_committed_transaction_into_the_sink() {
        let data = encode(&[
            RedoOp::TxnEnter { id: txn(1) },
            RedoOp::TxnStore { id: txn(1), index: idx(1), key: b"k1".to_vec(), value: b"v1".to_vec() },
            RedoOp::TxnStore { id: txn(1), index: idx(1), key: b"k2".to_vec(), value: b"v2".to_vec() },
            RedoOp::TxnCommitFinal { id: txn(1) },
        ]);

        let sink = Arc::new(MapSink::new());
        let n = replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink), Some(2)).unwrap();
        assert_eq!(n, 4);
        assert_eq!(sink.get(idx(1), b"k1"), Some(b"v1".to_vec()));
        assert_eq!(sink.get(idx(1), b"k2"), Some(b"v2".to_vec()));
    }

    #[test]
    fn rolled_back_transaction_does_not_double_unlock_or_deadlock() {
        // the sink still observes the store (eager application, §4.11
        // point 3) but rollback must release cleanly.
        let data = encode(&[
            RedoOp::TxnEnter { id: txn(2) },
            RedoOp::TxnStore { id: txn(2), index: idx(1), key: b"k1".to_vec(), value: b"v1".to_vec() },
            RedoOp::TxnRollbackFinal { id: txn(2) },
        ]);

        let sink = Arc::new(MapSink::new());
        let result = replay(&data, POLICY, TOKEN, false, manager(), sink, Some(2));
        assert!(result.is_ok());
    }

    #[test]
    fn independent_transactions_replay_without_blocking_on_each_others_locks() {
        let data = encode(&[
            RedoOp::TxnEnter { id: txn(1) },
            RedoOp::TxnEnter { id: txn(2) },
            RedoOp::TxnStore { id: txn(1), index: idx(1), key: b"a".to_vec(), value: b"1".to_vec() },
            RedoOp::TxnStore { id: txn(2), index: idx(1), key: b"b".to_vec(), value: b"2".to_vec() },
            RedoOp::TxnCommitFinal { id: txn(1) },
            RedoOp::TxnCommitFinal { id: txn(2) },
        ]);

        let sink = Arc::new(MapSink::new());
        replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink), Some(4)).unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn replaying_the_same_prefix_twice_is_idempotent() {
        let data = encode(&[
            RedoOp::TxnEnter { id: txn(1) },
            RedoOp::TxnStore { id: txn(1), index: idx(1), key: b"k".to_vec(), value: b"v1".to_vec() },
            RedoOp::TxnStore { id: txn(1), index: idx(1), key: b"k".to_vec(), value: b"v2".to_vec() },
            RedoOp::TxnCommitFinal { id: txn(1) },
        ]);

        let sink = Arc::new(MapSink::new());
        replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink), Some(2)).unwrap();
        let after_first = sink.get(idx(1), b"k");

        let sink2 = Arc::new(MapSink::new());
        replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink2), Some(2)).unwrap();
        replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink2), Some(2)).unwrap();
        assert_eq!(sink2.get(idx(1), b"k"), after_first);
    }

    #[test]
    fn autocommit_store_is_lock_protected_and_visible_after_replay() {
        let data = encode(&[RedoOp::Store { index: idx(1), key: b"auto".to_vec(), value: b"val".to_vec() }]);

        let sink = Arc::new(MapSink::new());
        replay(&data, POLICY, TOKEN, false, manager(), Arc::clone(&sink), Some(2)).unwrap();
        assert_eq!(sink.get(idx(1), b"auto"), Some(b"val".to_vec()));
    }

    #[test]
    fn unknown_txn_in_lenient_mode_is_skipped_rather_than_failing_replay() {
        let data = encode(&[RedoOp::TxnStore { id: txn(99), index: idx(1), key: b"k".to_vec(), value: b"v".to_vec() }]);

        let sink = Arc::new(MapSink::new());
        let result = replay(&data, POLICY, TOKEN, true, manager(), sink, Some(2));
        assert!(result.is_ok());
    }
}
