use std::{sync::Arc, thread, time::Duration};

use lumbung::{DatabaseError, Engine, INVALID_XID, RecordId, utils::mock::TempStore};

fn setup_records(engine: &Engine, count: usize) -> Vec<RecordId> {
    let xid = engine.begin().unwrap();
    let rids = (0..count)
        .map(|_| engine.alloc(xid, 8).unwrap())
        .collect::<Vec<_>>();
    engine.commit(xid).unwrap();
    rids
}

#[test]
fn test_second_writer_waits_for_commit() {
    let store = TempStore::with_prefix("txn_wait");
    let engine = Arc::new(store.open().unwrap());
    let rid = setup_records(&engine, 1)[0];

    let first = engine.begin().unwrap();
    engine.write(first, rid, b"first...").unwrap();

    let waiter = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let second = engine.begin().unwrap();
            engine.write(second, rid, b"second..").unwrap();
            // The first writer's commit is visible once the lock is granted
            let seen = engine.read(INVALID_XID, rid).unwrap();
            engine.commit(second).unwrap();
            seen
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());
    engine.commit(first).unwrap();

    assert_eq!(waiter.join().unwrap(), b"first...");
    assert_eq!(engine.read(INVALID_XID, rid).unwrap(), b"second..");

    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_readers_do_not_block_on_writers() {
    let store = TempStore::with_prefix("txn_reader");
    let engine = Arc::new(store.open().unwrap());
    let rid = setup_records(&engine, 1)[0];

    let writer = engine.begin().unwrap();
    engine.write(writer, rid, b"pending!").unwrap();

    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let xid = engine.begin().unwrap();
            let seen = engine.read(xid, rid).unwrap();
            engine.commit(xid).unwrap();
            seen
        })
    };
    assert_eq!(reader.join().unwrap(), vec![0u8; 8]);

    engine.abort(writer).unwrap();
    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_lock_cycle_picks_one_victim() {
    let store = TempStore::with_prefix("txn_deadlock");
    let engine = Arc::new(store.open().unwrap());
    let rids = setup_records(&engine, 2);
    let (a, b) = (rids[0], rids[1]);

    let first = engine.begin().unwrap();
    let second = engine.begin().unwrap();
    engine.write(first, a, b"first-a.").unwrap();
    engine.write(second, b, b"second-b").unwrap();

    let other = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let result = engine.write(second, a, b"second-a");
            match &result {
                Ok(()) => engine.commit(second).unwrap(),
                Err(_) => engine.abort(second).unwrap(),
            }
            result
        })
    };

    thread::sleep(Duration::from_millis(100));
    let mine = engine.write(first, b, b"first-b.");
    match &mine {
        Ok(()) => engine.commit(first).unwrap(),
        Err(_) => engine.abort(first).unwrap(),
    }
    let theirs = other.join().unwrap();

    let victims = [&mine, &theirs]
        .iter()
        .filter(|result| matches!(result, Err(DatabaseError::Deadlock { .. })))
        .count();
    assert_eq!(victims, 1);
    assert!(mine.is_ok() || theirs.is_ok());

    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_parallel_writers_on_disjoint_records() {
    let store = TempStore::with_prefix("txn_parallel");
    let engine = Arc::new(store.open().unwrap());
    let rids = setup_records(&engine, 8);

    let handles = rids
        .iter()
        .enumerate()
        .map(|(i, rid)| {
            let engine = Arc::clone(&engine);
            let rid = *rid;
            thread::spawn(move || {
                for round in 0..20u8 {
                    let xid = engine.begin().unwrap();
                    engine.write(xid, rid, &[i as u8, round]).unwrap();
                    engine.commit(xid).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }

    for (i, rid) in rids.iter().enumerate() {
        let bytes = engine.read(INVALID_XID, *rid).unwrap();
        assert_eq!(&bytes[..2], &[i as u8, 19]);
    }
    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_concurrent_allocs_get_distinct_records() {
    let store = TempStore::with_prefix("txn_alloc");
    let engine = Arc::new(store.open().unwrap());

    let handles = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let xid = engine.begin().unwrap();
                let mut rids = Vec::new();
                for _ in 0..25 {
                    match engine.alloc(xid, 40) {
                        Ok(rid) => rids.push(rid),
                        Err(DatabaseError::ConcurrencyError) => continue,
                        Err(e) => panic!("alloc failed: {e}"),
                    }
                }
                engine.commit(xid).unwrap();
                rids
            })
        })
        .collect::<Vec<_>>();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let count = all.len();
    all.sort_by_key(|rid| rid.location());
    all.dedup_by_key(|rid| rid.location());
    assert_eq!(all.len(), count);

    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_failed_write_leaves_no_lock_behind() {
    let store = TempStore::with_prefix("txn_failed_write");
    let engine = store.open().unwrap();

    // Fill the root page so the next small record starts page 2
    let setup = engine.begin().unwrap();
    engine.alloc(setup, 4000).unwrap();
    engine.commit(setup).unwrap();

    let first = engine.begin().unwrap();
    let second = engine.begin().unwrap();
    let unallocated = RecordId::new(2, 0, 100);
    assert!(matches!(
        engine.write(first, unallocated, b"x"),
        Err(DatabaseError::InvalidRecord { .. })
    ));
    assert!(matches!(
        engine.write_range(first, unallocated, 0, b"x"),
        Err(DatabaseError::InvalidRecord { .. })
    ));
    assert!(matches!(
        engine.dealloc(first, unallocated),
        Err(DatabaseError::InvalidRecord { .. })
    ));

    let rid = engine.alloc(second, 100).unwrap();
    assert_eq!(rid, unallocated);
    engine.write(second, rid, b"taken").unwrap();
    engine.commit(second).unwrap();
    engine.commit(first).unwrap();
    engine.deinit().unwrap();
}

#[test]
fn test_write_to_a_record_freed_meanwhile_releases_its_lock() {
    let store = TempStore::with_prefix("txn_freed_meanwhile");
    let engine = Arc::new(store.open().unwrap());
    let rid = setup_records(&engine, 1)[0];

    let freer = engine.begin().unwrap();
    engine.dealloc(freer, rid).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let xid = engine.begin().unwrap();
            let result = engine.write(xid, rid, b"late");
            (xid, result)
        })
    };
    thread::sleep(Duration::from_millis(100));
    engine.commit(freer).unwrap();

    let (xid, result) = writer.join().unwrap();
    assert!(matches!(result, Err(DatabaseError::InvalidRecord { .. })));

    // The slot is free for others while the writer is still open
    let other = engine.begin().unwrap();
    let fresh = engine.alloc(other, 8).unwrap();
    assert_eq!(fresh.location(), rid.location());
    engine.commit(other).unwrap();
    engine.abort(xid).unwrap();

    let engine = Arc::into_inner(engine).unwrap();
    engine.deinit().unwrap();
}
