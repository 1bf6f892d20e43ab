use std::collections::HashMap;

use lumbung::{
    DatabaseError, INVALID_XID, InsertOutcome, RecordId, RemoveOutcome,
    index::hash_table::{INITIAL_BUCKETS, TABLE_HEADER_SIZE},
    utils::mock::TempStore,
};

#[test]
fn test_insert_then_update_reports_outcome() {
    let store = TempStore::with_prefix("hash_outcome");
    let engine = store.open().unwrap();

    let xid = engine.begin().unwrap();
    let table = engine.hash_create(xid).unwrap();
    assert_eq!(table.size(), Some(TABLE_HEADER_SIZE));

    let first = engine.hash_insert(xid, table, b"foo", b"bar").unwrap();
    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(first as i32, 0);
    let second = engine.hash_insert(xid, table, b"foo", b"baz").unwrap();
    assert_eq!(second, InsertOutcome::Updated);
    assert_eq!(engine.hash_lookup(xid, table, b"foo").unwrap().unwrap(), b"baz");

    // A value of another length moves the entry
    engine.hash_insert(xid, table, b"foo", b"a much longer value").unwrap();
    assert_eq!(
        engine.hash_lookup(xid, table, b"foo").unwrap().unwrap(),
        b"a much longer value"
    );
    engine.hash_insert(xid, table, b"foo", b"").unwrap();
    assert_eq!(engine.hash_lookup(xid, table, b"foo").unwrap().unwrap(), b"");

    assert_eq!(engine.hash_index().header(xid, table).unwrap().entry_count, 1);
    engine.commit(xid).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_abort_and_restart_keep_committed_entries() {
    let store = TempStore::with_prefix("hash_restart");
    let table = {
        let engine = store.open().unwrap();
        let xid1 = engine.begin().unwrap();
        let table = engine.hash_create(xid1).unwrap();
        engine.hash_insert(xid1, table, b"foo", b"bar").unwrap();
        engine.commit(xid1).unwrap();

        let xid2 = engine.begin().unwrap();
        engine.hash_insert(xid2, table, b"foo", b"baz").unwrap();
        engine.hash_insert(xid2, table, b"bar", b"bat").unwrap();
        engine.abort(xid2).unwrap();

        assert_eq!(
            engine.hash_lookup(INVALID_XID, table, b"foo").unwrap().unwrap(),
            b"bar"
        );
        assert_eq!(engine.hash_lookup(INVALID_XID, table, b"bar").unwrap(), None);
        engine.deinit().unwrap();
        table
    };

    let engine = store.open().unwrap();
    assert_eq!(
        engine.hash_lookup(INVALID_XID, table, b"foo").unwrap().unwrap(),
        b"bar"
    );
    assert_eq!(engine.hash_lookup(INVALID_XID, table, b"bar").unwrap(), None);
    engine.deinit().unwrap();
}

#[test]
fn test_remove_is_not_an_error_when_missing() {
    let store = TempStore::with_prefix("hash_remove");
    let engine = store.open().unwrap();

    let xid = engine.begin().unwrap();
    let table = engine.hash_create(xid).unwrap();
    for key in ["alpha", "beta", "gamma"] {
        engine
            .hash_insert(xid, table, key.as_bytes(), key.to_uppercase().as_bytes())
            .unwrap();
    }
    assert_eq!(
        engine.hash_remove(xid, table, b"beta").unwrap(),
        RemoveOutcome::Removed
    );
    assert_eq!(
        engine.hash_remove(xid, table, b"beta").unwrap(),
        RemoveOutcome::NotFound
    );
    assert_eq!(
        engine.hash_remove(xid, table, b"delta").unwrap(),
        RemoveOutcome::NotFound
    );
    engine.commit(xid).unwrap();

    assert_eq!(engine.hash_lookup(INVALID_XID, table, b"beta").unwrap(), None);
    assert_eq!(
        engine.hash_lookup(INVALID_XID, table, b"alpha").unwrap().unwrap(),
        b"ALPHA"
    );
    assert_eq!(
        engine.hash_lookup(INVALID_XID, table, b"gamma").unwrap().unwrap(),
        b"GAMMA"
    );
    assert_eq!(
        engine.hash_index().header(INVALID_XID, table).unwrap().entry_count,
        2
    );
    engine.deinit().unwrap();
}

#[test]
fn test_table_grows_and_keeps_every_entry() {
    let store = TempStore::with_prefix("hash_grow");
    let engine = store.open().unwrap();
    let count = (INITIAL_BUCKETS * 4 * 2 + 5) as usize;
    let expected: HashMap<Vec<u8>, Vec<u8>> = (0..count)
        .map(|i| {
            (
                format!("key-{i}").into_bytes(),
                format!("value-{}", i * 7).into_bytes(),
            )
        })
        .collect();

    let xid = engine.begin().unwrap();
    let table = engine.hash_create(xid).unwrap();
    for (key, value) in &expected {
        assert_eq!(
            engine.hash_insert(xid, table, key, value).unwrap(),
            InsertOutcome::Inserted
        );
    }
    engine.commit(xid).unwrap();

    let header = engine.hash_index().header(INVALID_XID, table).unwrap();
    assert_eq!(header.entry_count, count as u64);
    assert!(header.bucket_count >= INITIAL_BUCKETS * 4);

    for (key, value) in &expected {
        assert_eq!(
            &engine.hash_lookup(INVALID_XID, table, key).unwrap().unwrap(),
            value
        );
    }
    engine.deinit().unwrap();
}

#[test]
fn test_aborted_growth_restores_the_old_directory() {
    let store = TempStore::with_prefix("hash_grow_abort");
    let engine = store.open().unwrap();

    let xid = engine.begin().unwrap();
    let table = engine.hash_create(xid).unwrap();
    engine.hash_insert(xid, table, b"anchor", b"kept").unwrap();
    engine.commit(xid).unwrap();
    let before = engine.hash_index().header(INVALID_XID, table).unwrap();

    let xid = engine.begin().unwrap();
    for i in 0..(INITIAL_BUCKETS * 4 + 1) {
        engine
            .hash_insert(xid, table, format!("k{i}").as_bytes(), b"v")
            .unwrap();
    }
    assert!(engine.hash_index().header(xid, table).unwrap().bucket_count > before.bucket_count);
    engine.abort(xid).unwrap();

    assert_eq!(engine.hash_index().header(INVALID_XID, table).unwrap(), before);
    assert_eq!(
        engine.hash_lookup(INVALID_XID, table, b"anchor").unwrap().unwrap(),
        b"kept"
    );
    assert_eq!(engine.hash_lookup(INVALID_XID, table, b"k0").unwrap(), None);
    engine.deinit().unwrap();
}

#[test]
fn test_uncommitted_inserts_are_private() {
    let store = TempStore::with_prefix("hash_private");
    let engine = store.open().unwrap();

    let setup = engine.begin().unwrap();
    let table = engine.hash_create(setup).unwrap();
    engine.commit(setup).unwrap();

    let writer = engine.begin().unwrap();
    engine.hash_insert(writer, table, b"secret", b"42").unwrap();
    assert_eq!(
        engine.hash_lookup(writer, table, b"secret").unwrap().unwrap(),
        b"42"
    );
    assert_eq!(engine.hash_lookup(INVALID_XID, table, b"secret").unwrap(), None);

    let reader = engine.begin().unwrap();
    assert_eq!(engine.hash_lookup(reader, table, b"secret").unwrap(), None);
    engine.commit(reader).unwrap();

    engine.commit(writer).unwrap();
    assert_eq!(
        engine.hash_lookup(INVALID_XID, table, b"secret").unwrap().unwrap(),
        b"42"
    );
    engine.deinit().unwrap();
}

#[test]
fn test_non_table_record_is_rejected() {
    let store = TempStore::with_prefix("hash_not_a_table");
    let engine = store.open().unwrap();

    let xid = engine.begin().unwrap();
    let plain = engine.alloc(xid, TABLE_HEADER_SIZE).unwrap();
    assert!(matches!(
        engine.hash_lookup(xid, plain, b"key"),
        Err(DatabaseError::CorruptedIndex { .. })
    ));
    assert!(matches!(
        engine.hash_lookup(xid, RecordId::Root, b"key"),
        Err(DatabaseError::CorruptedIndex { .. })
    ));
    engine.commit(xid).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_large_values_are_stored_as_blobs() {
    let store = TempStore::with_prefix("hash_blob");
    let engine = store.open().unwrap();
    let value = vec![0x5A; 10_000];

    let xid = engine.begin().unwrap();
    let table = engine.hash_create(xid).unwrap();
    engine.hash_insert(xid, table, b"big", &value).unwrap();
    engine.commit(xid).unwrap();

    assert_eq!(engine.hash_lookup(INVALID_XID, table, b"big").unwrap().unwrap(), value);
    engine.deinit().unwrap();
}
