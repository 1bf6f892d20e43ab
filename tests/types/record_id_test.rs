use lumbung::types::{
    BLOB_THRESHOLD_SIZE, ROOT_RECORD_SIZE,
    error::DatabaseError,
    record_id::{RECORD_ID_ENCODED_SIZE, RecordId, RecordType},
};

#[test]
fn test_sentinels_from_raw_form() {
    assert_eq!(RecordId::from_raw(1, 0, -1).unwrap(), RecordId::Root);
    assert_eq!(RecordId::from_raw(0, 0, -1).unwrap(), RecordId::Null);
    // Page 0 never holds records
    assert_eq!(RecordId::from_raw(0, 3, 12).unwrap(), RecordId::Null);

    assert!(matches!(
        RecordId::from_raw(2, 0, -1),
        Err(DatabaseError::SerializationError { .. })
    ));
    assert!(matches!(
        RecordId::from_raw(2, -4, 10),
        Err(DatabaseError::SerializationError { .. })
    ));

    assert_eq!(RecordId::Root.to_raw(), (1, 0, -1));
    assert_eq!(RecordId::new(7, 3, 120).to_raw(), (7, 3, 120));
}

#[test]
fn test_root_resolves_to_first_slot_of_first_page() {
    assert_eq!(RecordId::Root.location(), Some((1, 0)));
    assert_eq!(RecordId::Root.size(), Some(ROOT_RECORD_SIZE));
    assert_eq!(RecordId::Null.location(), None);
    assert_eq!(RecordId::Null.size(), None);
    assert!(RecordId::Null.is_null());
}

#[test]
fn test_encoded_form() {
    assert_eq!(
        RecordId::from_bytes(&[0u8; RECORD_ID_ENCODED_SIZE]).unwrap(),
        RecordId::Null
    );

    let rid = RecordId::new(1 << 33, 17, 4096);
    let bytes = rid.to_bytes();
    assert_eq!(&bytes[0..8], &(1i64 << 33).to_le_bytes());
    assert_eq!(RecordId::from_bytes(&bytes).unwrap(), rid);
    assert_eq!(RecordId::from_bytes(&RecordId::Root.to_bytes()).unwrap(), RecordId::Root);

    assert!(matches!(
        RecordId::from_bytes(&bytes[..12]),
        Err(DatabaseError::SerializationError { .. })
    ));
}

#[test]
fn test_display_and_parse() {
    let rid = RecordId::new(3, 4, 100);
    assert_eq!(rid.to_string(), "3:4:100");
    assert_eq!("3:4:100".parse::<RecordId>().unwrap(), rid);
    assert_eq!("ROOT".parse::<RecordId>().unwrap(), RecordId::Root);
    assert_eq!(RecordId::Null.to_string(), "NULL");
    assert!("3:4".parse::<RecordId>().is_err());
    assert!("a:b:c".parse::<RecordId>().is_err());
}

#[test]
fn test_blob_threshold() {
    assert!(!RecordId::new(2, 0, BLOB_THRESHOLD_SIZE).is_blob());
    assert!(RecordId::new(2, 0, BLOB_THRESHOLD_SIZE + 1).is_blob());
    assert!(!RecordId::Root.is_blob());
}

#[test]
fn test_record_type_codes() {
    assert_eq!(RecordType::Normal.as_i32(), -3);
    assert_eq!(RecordType::Blob.as_i32(), -2);
    assert_eq!(RecordType::Invalid.as_i32(), -1);
}
