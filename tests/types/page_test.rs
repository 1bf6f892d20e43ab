use std::collections::HashSet;

use lumbung::types::{
    PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_DIRECTORY_ENTRY_SIZE, SlotId,
    error::DatabaseError,
    page::{Page, PageType, SlotFlags},
};

// Test utilities
fn create_test_data(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_add(seed)).collect()
}

fn install_filled(page: &mut Page, slot: SlotId, data: &[u8]) {
    page.install(slot, data.len(), SlotFlags::Normal, &HashSet::new())
        .unwrap();
    page.get_cell_mut(slot).unwrap().copy_from_slice(data);
}

#[test]
fn test_page_creation_and_basic_properties() {
    let page = Page::new(1, PageType::Slotted);

    assert_eq!(page.page_id, 1);
    assert_eq!(page.page_type, PageType::Slotted);
    assert_eq!(page.lsn, 0);
    assert_eq!(page.free_space_offset, PAGE_SIZE as u16);
    assert!(page.is_dirty);
    assert!(page.slots.is_empty());
    assert_eq!(page.available_space(), PAGE_SIZE - PAGE_HEADER_SIZE);
}

#[test]
fn test_cell_installation_and_retrieval() {
    let mut page = Page::new(2, PageType::Slotted);
    let first = create_test_data(100, 1);
    let second = create_test_data(50, 7);

    install_filled(&mut page, 0, &first);
    install_filled(&mut page, 1, &second);

    assert_eq!(page.get_cell(0).unwrap(), &first[..]);
    assert_eq!(page.get_cell(1).unwrap(), &second[..]);

    let expected_space = PAGE_SIZE
        - PAGE_HEADER_SIZE
        - (2 * SLOT_DIRECTORY_ENTRY_SIZE)
        - first.len()
        - second.len();
    assert_eq!(page.available_space(), expected_space);
}

#[test]
fn test_released_slot_reads_as_empty() {
    let mut page = Page::new(2, PageType::Slotted);
    install_filled(&mut page, 0, &create_test_data(30, 0));

    page.release(0).unwrap();
    assert!(page.slot(0).unwrap().is_free());
    assert!(page.get_cell(0).is_none());

    let result = page.release(0);
    assert!(matches!(result, Err(DatabaseError::CorruptedPage { page_id: 2, .. })));
}

#[test]
fn test_serialization_preserves_slots_and_lsn() {
    let mut page = Page::new(9, PageType::Slotted);
    let data = create_test_data(64, 3);
    install_filled(&mut page, 0, &data);
    install_filled(&mut page, 2, &data[..10]);
    page.release(2).unwrap();
    page.lsn = 77;

    let restored = Page::from_bytes(&page.to_bytes()).unwrap();
    assert_eq!(restored.page_id, 9);
    assert_eq!(restored.lsn, 77);
    assert!(!restored.is_dirty);
    assert_eq!(restored.slots, page.slots);
    assert_eq!(restored.free_space_offset, page.free_space_offset);
    assert_eq!(restored.get_cell(0).unwrap(), &data[..]);
    assert!(restored.get_cell(2).is_none());
}

#[test]
fn test_checksum_detects_corruption() {
    let mut page = Page::new(4, PageType::Slotted);
    install_filled(&mut page, 0, &create_test_data(16, 0));
    let mut bytes = page.to_bytes();
    bytes[PAGE_SIZE - 4] ^= 0xFF;

    let result = Page::from_bytes(&bytes);
    assert!(matches!(result, Err(DatabaseError::CorruptedPage { page_id: 4, .. })));
}

#[test]
fn test_wrong_page_size_is_rejected() {
    let result = Page::from_bytes(&[0u8; 100]);
    assert!(matches!(
        result,
        Err(DatabaseError::InvalidPageSize { expected: PAGE_SIZE, actual: 100 })
    ));
}

#[test]
fn test_find_slot_skips_reserved_tombstones() {
    let mut page = Page::new(3, PageType::Slotted);
    for slot in 0..4 {
        install_filled(&mut page, slot, &create_test_data(1000, slot as u8));
    }
    page.release(1).unwrap();

    assert_eq!(page.find_slot(1000, &HashSet::new()), Some(1));

    let reserved: HashSet<SlotId> = [1].into_iter().collect();
    assert_eq!(page.find_slot(1000, &reserved), None);
    assert_eq!(page.find_slot(10, &reserved), Some(4));
}

#[test]
fn test_compaction_keeps_live_cells_and_reserved_tombstones() {
    let mut page = Page::new(3, PageType::Slotted);
    let cells: Vec<Vec<u8>> = (0..4).map(|seed| create_test_data(1000, seed * 50)).collect();
    for (slot, data) in cells.iter().enumerate() {
        install_filled(&mut page, slot as SlotId, data);
    }

    // Forces a compaction that drops the freed cell of slot 1
    page.release(1).unwrap();
    page.install(1, 500, SlotFlags::Normal, &HashSet::new()).unwrap();
    assert_eq!(page.get_cell(1).unwrap(), &[0u8; 500][..]);
    for slot in [0, 2, 3] {
        assert_eq!(page.get_cell(slot).unwrap(), &cells[slot as usize][..]);
    }

    // A reserved tombstone survives compaction, so there is no room left
    page.release(1).unwrap();
    let reserved: HashSet<SlotId> = [1].into_iter().collect();
    let result = page.install(4, 900, SlotFlags::Normal, &reserved);
    assert!(matches!(result, Err(DatabaseError::PageFull { page_id: 3 })));

    page.install(4, 900, SlotFlags::Normal, &HashSet::new()).unwrap();
    for slot in [0, 2, 3] {
        assert_eq!(page.get_cell(slot).unwrap(), &cells[slot as usize][..]);
    }
}

#[test]
fn test_blob_page_keeps_raw_bytes() {
    let mut page = Page::new(5, PageType::Blob);
    let data = create_test_data(PAGE_SIZE - PAGE_HEADER_SIZE, 11);
    page.blob_data_mut().copy_from_slice(&data);

    let restored = Page::from_bytes(&page.to_bytes()).unwrap();
    assert_eq!(restored.page_type, PageType::Blob);
    assert!(restored.slots.is_empty());
    assert_eq!(restored.blob_data(), &data[..]);
}
