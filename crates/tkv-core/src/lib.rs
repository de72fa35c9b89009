//! Database/Index/Cursor facade wiring the storage and concurrency
//! core together (§6). Built as the minimum needed to exercise C1–C11
//! end to end: a [`Database`] opens named [`Index`]es backed by
//! [`ByteIndex`] (an in-memory reference ordered store, not a real
//! B-tree — that's out of scope here), mints [`Txn`]s that acquire
//! real locks and produce real redo bytes, and can replay its own redo
//! log through `tkv-recovery`.

mod cursor;
mod database;
mod index;
mod txn;
mod value;

pub use cursor::IndexCursor;
pub use database::Database;
pub use index::{BTreeIndex, ByteIndex, Index};
pub use txn::Txn;
pub use value::ByteIndexValueHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use tkv_cursor::{Cursor, MergeCursor, MergeMode};
    use tkv_lock::LockResult;
    use tkv_types::{DatabaseConfig, DurabilityMode};

    fn db() -> Database {
        Database::open(DatabaseConfig::new())
    }

    #[test]
    fn store_is_visible_after_commit() {
        let db = db();
        let ix = db.create_index(b"widgets");
        let index = db.index_by_id(ix).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        index.store(&mut txn, b"a", b"1").unwrap();
        db.commit(txn).unwrap();

        let mut reader = db.new_transaction(DurabilityMode::Sync);
        assert_eq!(index.load(&mut reader, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_undoes_writes_including_a_prior_value() {
        let db = db();
        let ix = db.create_index(b"widgets");
        let index = db.index_by_id(ix).unwrap();

        let mut seed = db.new_transaction(DurabilityMode::Sync);
        index.store(&mut seed, b"a", b"orig").unwrap();
        db.commit(seed).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        index.store(&mut txn, b"a", b"changed").unwrap();
        index.store(&mut txn, b"b", b"new").unwrap();
        db.rollback(txn).unwrap();

        let mut reader = db.new_transaction(DurabilityMode::Sync);
        assert_eq!(index.load(&mut reader, b"a").unwrap(), Some(b"orig".to_vec()));
        assert_eq!(index.load(&mut reader, b"b").unwrap(), None);
    }

    #[test]
    fn insert_fails_on_existing_key_replace_fails_on_missing_key() {
        let db = db();
        let ix = db.create_index(b"widgets");
        let index = db.index_by_id(ix).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        index.insert(&mut txn, b"a", b"1").unwrap();
        assert!(index.insert(&mut txn, b"a", b"2").is_err());
        assert!(index.replace(&mut txn, b"missing", b"x").is_err());
        index.replace(&mut txn, b"a", b"3").unwrap();
        db.commit(txn).unwrap();

        let mut reader = db.new_transaction(DurabilityMode::Sync);
        assert_eq!(index.load(&mut reader, b"a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn touch_reports_a_real_lock_result() {
        let db = db();
        let ix = db.create_index(b"widgets");
        let index = db.index_by_id(ix).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        let first = index.touch(&mut txn, b"a").unwrap();
        assert_eq!(first, LockResult::Acquired);
        let second = index.lock_shared(&mut txn, b"a").unwrap();
        assert_eq!(second, LockResult::OwnedShared);
        db.commit(txn).unwrap();
    }

    #[test]
    fn merge_cursor_intersects_two_live_indexes() {
        let db = db();
        let left_id = db.create_index(b"left");
        let right_id = db.create_index(b"right");
        let left = db.index_by_id(left_id).unwrap();
        let right = db.index_by_id(right_id).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        left.store(&mut txn, b"a", b"1").unwrap();
        left.store(&mut txn, b"b", b"2").unwrap();
        right.store(&mut txn, b"b", b"20").unwrap();
        right.store(&mut txn, b"c", b"3").unwrap();

        let a = left.new_cursor(&txn);
        let b = right.new_cursor(&txn);
        let mut merged =
            MergeCursor::new(a, b, MergeMode::Intersection, |_k, av, bv| Some([av, bv].concat()));
        merged.first().unwrap();
        assert_eq!(merged.key(), Some(b"b".as_slice()));
        assert_eq!(merged.value(), Some(b"220".as_slice()));
        merged.next().unwrap();
        assert_eq!(merged.key(), None);

        db.commit(txn).unwrap();
    }

    #[test]
    fn recover_replays_the_accumulated_redo_log_idempotently() {
        let db = db();
        let ix = db.create_index(b"widgets");
        let index = db.index_by_id(ix).unwrap();

        let mut txn = db.new_transaction(DurabilityMode::Sync);
        index.store(&mut txn, b"a", b"1").unwrap();
        index.store(&mut txn, b"b", b"2").unwrap();
        db.commit(txn).unwrap();

        let mut doomed = db.new_transaction(DurabilityMode::Sync);
        index.store(&mut doomed, b"a", b"clobbered").unwrap();
        db.rollback(doomed).unwrap();

        // replaying this database's own redo log against its own live
        // indexes should be a no-op: every op it contains was already
        // applied eagerly when it was first recorded.
        let n = db.recover(false).unwrap();
        assert!(n > 0);
        let n2 = db.recover(false).unwrap();
        assert_eq!(n, n2);

        let mut reader = db.new_transaction(DurabilityMode::Sync);
        assert_eq!(index.load(&mut reader, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(index.load(&mut reader, b"b").unwrap(), Some(b"2".to_vec()));
    }
}
