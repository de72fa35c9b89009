//! Redo log binary codec (§4.4, §6, C4).

mod decoder;
mod encoder;
mod op;
mod terminator;
mod varint;
mod visitor;

pub use decoder::{RedoDecoder, Step};
pub use encoder::RedoEncoder;
pub use op::RedoOp;
pub use visitor::{RedoVisitor, VisitResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tkv_types::{IndexId, TerminatorPolicy, TxnId};

    #[derive(Default)]
    struct Recording {
        calls: RefCell<Vec<String>>,
    }

    impl RedoVisitor for Recording {
        fn txn_enter(&mut self, id: TxnId) -> VisitResult {
            self.calls.borrow_mut().push(format!("txn_enter({})", id.get()));
            VisitResult::Continue
        }
        fn txn_store(&mut self, id: TxnId, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
            self.calls.borrow_mut().push(format!(
                "txn_store({},{},{:?},{:?})",
                id.get(),
                index.get(),
                key,
                value
            ));
            VisitResult::Continue
        }
        fn txn_commit_final(&mut self, id: TxnId) -> VisitResult {
            self.calls
                .borrow_mut()
                .push(format!("txn_commit_final({})", id.get()));
            VisitResult::Continue
        }
        fn store(&mut self, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
            self.calls
                .borrow_mut()
                .push(format!("store({},{:?},{:?})", index.get(), key, value));
            VisitResult::Continue
        }
    }

    #[test]
    fn s3_redo_round_trip() {
        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 0xDEAD_BEEF);
        let mut buf = Vec::new();
        let id = TxnId::new(5).unwrap();
        encoder.encode(&RedoOp::TxnEnter { id }, &mut buf);
        encoder.encode(
            &RedoOp::TxnStore {
                id,
                index: IndexId::new(1),
                key: vec![0x01],
                value: vec![0x02],
            },
            &mut buf,
        );
        encoder.encode(&RedoOp::TxnCommitFinal { id }, &mut buf);

        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 0xDEAD_BEEF, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let count = decoder.decode_all(&buf, &mut pos, &mut visitor).unwrap();
        assert_eq!(count, 3);
        assert_eq!(pos, buf.len());
        assert_eq!(
            visitor.calls.into_inner(),
            vec![
                "txn_enter(5)".to_string(),
                "txn_store(5,1,[1],[2])".to_string(),
                "txn_commit_final(5)".to_string(),
            ]
        );
    }

    fn all_ops() -> Vec<RedoOp> {
        let id = TxnId::new(7).unwrap();
        let index = IndexId::new(3);
        vec![
            RedoOp::Reset,
            RedoOp::Timestamp { ts: 42 },
            RedoOp::Shutdown { ts: 43 },
            RedoOp::Close { ts: 44 },
            RedoOp::EndFile { ts: 45 },
            RedoOp::NopRandom { filler: vec![1, 2, 3] },
            RedoOp::TxnIdReset { id: 100 },
            RedoOp::TxnEnter { id },
            RedoOp::TxnRollback { id },
            RedoOp::TxnRollbackFinal { id },
            RedoOp::TxnCommit { id },
            RedoOp::TxnCommitFinal { id },
            RedoOp::Store {
                index,
                key: vec![1],
                value: vec![2, 3],
            },
            RedoOp::StoreNoLock {
                index,
                key: vec![4],
                value: vec![5],
            },
            RedoOp::Delete { index, key: vec![6] },
            RedoOp::DeleteNoLock { index, key: vec![7] },
            RedoOp::RenameIndex {
                id,
                index,
                new_name: b"widgets".to_vec(),
            },
            RedoOp::DeleteIndex { id, index },
            RedoOp::TxnEnterStore {
                id,
                index,
                key: vec![8],
                value: vec![9],
            },
            RedoOp::TxnStore {
                id,
                index,
                key: vec![10],
                value: vec![11],
            },
            RedoOp::TxnStoreCommit {
                id,
                index,
                key: vec![12],
                value: vec![13],
            },
            RedoOp::TxnStoreCommitFinal {
                id,
                index,
                key: vec![14],
                value: vec![15],
            },
            RedoOp::TxnEnterDelete { id, index, key: vec![16] },
            RedoOp::TxnDelete { id, index, key: vec![17] },
            RedoOp::TxnDeleteCommit { id, index, key: vec![18] },
            RedoOp::TxnDeleteCommitFinal { id, index, key: vec![19] },
            RedoOp::TxnCustom { id, msg: b"hello".to_vec() },
            RedoOp::TxnCustomLock {
                id,
                index,
                key: vec![20],
                msg: b"world".to_vec(),
            },
        ]
    }

    #[test]
    fn every_opcode_round_trips_individually() {
        for op in all_ops() {
            for policy in [TerminatorPolicy::RandomToken, TerminatorPolicy::TxnIdHash] {
                let mut encoder = RedoEncoder::new(policy, 0x1234_5678);
                let mut buf = Vec::new();
                encoder.encode(&op, &mut buf);

                let mut decoder = RedoDecoder::new(policy, 0x1234_5678, false);
                let mut visitor = Recording::default();
                let mut pos = 0;
                decoder.decode_all(&buf, &mut pos, &mut visitor).unwrap();
                assert_eq!(pos, buf.len(), "op {op:?} under policy {policy:?} left trailing bytes");
            }
        }
    }

    #[test]
    fn truncated_stream_is_clean_eof_not_corruption() {
        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 7);
        let mut buf = Vec::new();
        encoder.encode(&RedoOp::Timestamp { ts: 99 }, &mut buf);
        buf.truncate(buf.len() - 1);

        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 7, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let step = decoder.decode_one(&buf, &mut pos, &mut visitor).unwrap();
        assert_eq!(step, Step::CleanEof);
        assert_eq!(pos, 0);
    }

    #[test]
    fn torn_tail_record_fires_no_visitor_call_and_leaves_running_id_unchanged() {
        // §4.4: a short read at end of stream is a clean EOF, not
        // corruption — but it must also leave no partial effect behind,
        // since the record it belongs to was never durably terminated.
        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 7);
        let mut buf = Vec::new();
        encoder.encode(
            &RedoOp::Store {
                index: IndexId::new(1),
                key: vec![1],
                value: vec![2],
            },
            &mut buf,
        );
        // drop the terminator entirely; the opcode and payload survive intact.
        buf.truncate(buf.len() - 4);

        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 7, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let step = decoder.decode_one(&buf, &mut pos, &mut visitor).unwrap();
        assert_eq!(step, Step::CleanEof);
        assert_eq!(pos, 0);
        assert!(visitor.calls.into_inner().is_empty());
        assert_eq!(decoder.running_id(), 0);
    }

    #[test]
    fn invalid_terminator_fires_no_visitor_call() {
        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 7);
        let mut buf = Vec::new();
        encoder.encode(
            &RedoOp::TxnEnter { id: TxnId::new(9).unwrap() },
            &mut buf,
        );
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 7, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let err = decoder.decode_one(&buf, &mut pos, &mut visitor).unwrap_err();
        assert!(matches!(err, tkv_error::Error::CorruptRedoLog(_)));
        assert!(visitor.calls.into_inner().is_empty());
        assert_eq!(decoder.running_id(), 0);
    }

    #[test]
    fn bad_terminator_is_corrupt_not_eof() {
        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 7);
        let mut buf = Vec::new();
        encoder.encode(&RedoOp::Timestamp { ts: 99 }, &mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 7, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let err = decoder.decode_one(&buf, &mut pos, &mut visitor).unwrap_err();
        assert!(matches!(err, tkv_error::Error::CorruptRedoLog(_)));
    }

    #[test]
    fn unknown_opcode_is_corrupt() {
        let buf = vec![200u8, 0, 0, 0, 0];
        let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 0, false);
        let mut visitor = Recording::default();
        let mut pos = 0;
        let err = decoder.decode_one(&buf, &mut pos, &mut visitor).unwrap_err();
        assert!(matches!(err, tkv_error::Error::CorruptRedoLog(_)));
    }

    #[test]
    fn idempotent_prefix_replay_converges_to_same_state() {
        // §8 invariant #7: replaying a prefix twice yields the same
        // final set of (index, key, value) pairs — modeled here with a
        // simple last-writer-wins map visitor.
        use std::collections::BTreeMap;

        struct MapVisitor(BTreeMap<(u64, Vec<u8>), Vec<u8>>);
        impl RedoVisitor for MapVisitor {
            fn store(&mut self, index: IndexId, key: &[u8], value: &[u8]) -> VisitResult {
                self.0.insert((index.get(), key.to_vec()), value.to_vec());
                VisitResult::Continue
            }
        }

        let mut encoder = RedoEncoder::new(TerminatorPolicy::RandomToken, 1);
        let mut buf = Vec::new();
        encoder.encode(
            &RedoOp::Store {
                index: IndexId::new(1),
                key: vec![1],
                value: vec![9],
            },
            &mut buf,
        );

        let replay = |buf: &[u8]| {
            let mut decoder = RedoDecoder::new(TerminatorPolicy::RandomToken, 1, false);
            let mut visitor = MapVisitor(BTreeMap::new());
            let mut pos = 0;
            decoder.decode_all(buf, &mut pos, &mut visitor).unwrap();
            visitor.0
        };

        assert_eq!(replay(&buf), replay(&buf));
    }
}
