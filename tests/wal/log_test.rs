use std::{
    fs::OpenOptions,
    io::{Seek, SeekFrom, Write},
};

use lumbung::{
    DatabaseError,
    utils::mock::TempStore,
    wal::{
        entry::LogBody,
        log_file::{LogReader, LogWriter, create_log},
    },
};
use tempfile::tempdir;

#[test]
fn test_corrupt_frame_ends_the_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crc.log");
    create_log(&path, 1).unwrap();
    let first_frame_end = {
        let scan = LogReader::scan(&path).unwrap();
        let mut writer = LogWriter::open(&path, &scan, 4096).unwrap();
        writer.append(3, None, LogBody::Prepare).unwrap();
        writer.force().unwrap();
        let end = std::fs::metadata(&path).unwrap().len();
        writer.append(3, Some(1), LogBody::Commit).unwrap();
        writer.force().unwrap();
        end
    };

    // Flip a byte of the second frame's payload
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(first_frame_end + 5)).unwrap();
        file.write_all(&[0xFF]).unwrap();
    }

    let scan = LogReader::scan(&path).unwrap();
    assert_eq!(scan.entries.len(), 1);
    assert_eq!(scan.entries[0].body, LogBody::Prepare);
    assert_eq!(scan.valid_len, first_frame_end);
    assert!(scan.torn_bytes > 0);
}

#[test]
fn test_bad_magic_fails_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("magic.log");
    std::fs::write(&path, [7u8; 24]).unwrap();

    let result = LogReader::scan(&path);
    assert!(matches!(result, Err(DatabaseError::RecoveryFailure { .. })));

    std::fs::write(&path, [0u8; 10]).unwrap();
    let result = LogReader::scan(&path);
    assert!(matches!(result, Err(DatabaseError::RecoveryFailure { .. })));
}

#[test]
fn test_truncation_keeps_the_lsn_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("truncate.log");
    create_log(&path, 1).unwrap();

    let scan = LogReader::scan(&path).unwrap();
    let mut writer = LogWriter::open(&path, &scan, 4096).unwrap();
    for xid in 1..=5 {
        writer.append(xid, None, LogBody::Commit).unwrap();
    }
    writer.truncate().unwrap();
    assert_eq!(writer.durable_lsn(), 5);

    let scan = LogReader::scan(&path).unwrap();
    assert!(scan.entries.is_empty());
    assert_eq!(scan.start_lsn, 6);
    assert_eq!(scan.next_lsn(), 6);

    assert_eq!(writer.append(9, None, LogBody::Commit).unwrap(), 6);
    writer.force().unwrap();
    let scan = LogReader::scan(&path).unwrap();
    assert_eq!(scan.entries.len(), 1);
    assert_eq!(scan.entries[0].lsn, 6);
    assert_eq!(scan.entries[0].xid, 9);
}

#[test]
fn test_idle_checkpoint_truncates_the_store_log() {
    let store = TempStore::with_prefix("log_checkpoint");
    let engine = store.open().unwrap();

    let xid = engine.begin().unwrap();
    let rid = engine.alloc(xid, 32).unwrap();
    engine.write(xid, rid, b"checkpointed").unwrap();
    engine.commit(xid).unwrap();
    assert!(!LogReader::scan(store.log_file()).unwrap().entries.is_empty());

    assert!(engine.checkpoint().unwrap());
    let scan = LogReader::scan(store.log_file()).unwrap();
    assert!(scan.entries.is_empty());
    assert!(scan.start_lsn > 1);

    // With a transaction open the log has to stay
    let open = engine.begin().unwrap();
    engine.write(open, rid, b"still needed").unwrap();
    assert!(!engine.checkpoint().unwrap());
    let kept = LogReader::scan(store.log_file()).unwrap();
    assert!(!kept.entries.is_empty());
    assert_eq!(kept.entries[0].lsn, scan.start_lsn);
    assert!(kept.entries.last().unwrap().is_checkpoint());

    engine.abort(open).unwrap();
    engine.deinit().unwrap();
}
