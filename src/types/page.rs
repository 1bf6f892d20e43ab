use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    types::{
        Lsn, PAGE_HEADER_SIZE, PAGE_SIZE, PageId, SLOT_DIRECTORY_ENTRY_SIZE, SlotId,
        error::DatabaseError,
    },
    utils::hash::{calculate_page_checksum, verify_page_checksum},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageType {
    Slotted = 1,
    Blob = 2,
}

impl PageType {
    pub fn from_u8(value: u8) -> Result<Self, DatabaseError> {
        match value {
            1 => Ok(PageType::Slotted),
            2 => Ok(PageType::Blob),
            _ => Err(DatabaseError::InvalidPageType(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PageType::Slotted => 1,
            PageType::Blob => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFlags {
    Free,
    Normal,
    Blob,
}

impl SlotFlags {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(SlotFlags::Free),
            1 => Some(SlotFlags::Normal),
            2 => Some(SlotFlags::Blob),
            _ => None,
        }
    }

    fn as_u16(&self) -> u16 {
        match self {
            SlotFlags::Free => 0,
            SlotFlags::Normal => 1,
            SlotFlags::Blob => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotEntry {
    pub offset: u16, // Offset from beginning of page
    pub length: u16, // Length of the cell
    pub flags: SlotFlags,
}

impl SlotEntry {
    const EMPTY: SlotEntry = SlotEntry {
        offset: 0,
        length: 0,
        flags: SlotFlags::Free,
    };

    pub fn is_free(&self) -> bool {
        self.flags == SlotFlags::Free
    }
}

/*
 * Page Layout on Disk
 * ┌─────────────────────────────────────────────────────────────────┐
 * │                    PAGE HEADER (32 bytes)                       │
 * │  page_id(8) | page_type(1) | reserved(1) | slot_count(2) |     │
 * │  free_space_offset(2) | reserved(2) | lsn(8) | checksum(4) |    │
 * │  reserved(4)                                                    │
 * ├─────────────────────────────────────────────────────────────────┤
 * │  Slotted: SLOT DIRECTORY                                        │
 * │  [slot0: offset(2)|len(2)|flags(2)] [slot1: ...] ...            │
 * │           FREE SPACE                                            │
 * │           CELL DATA  [...cell N...] ... [...cell 0...]          │
 * ├─────────────────────────────────────────────────────────────────┤
 * │  Blob: raw record bytes up to the end of the page               │
 * └─────────────────────────────────────────────────────────────────┘
 *
 * A freed slot keeps its offset/length as a tombstone. Compaction drops
 * tombstones unless the caller reserves them, which is how a slot freed by
 * an uncommitted transaction keeps the space its restore will need.
 */

const CHECKSUM_OFFSET: usize = 24;

#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,
    pub page_type: PageType,
    pub lsn: Lsn,
    pub is_dirty: bool,

    // Slotted page structure
    pub slots: Vec<SlotEntry>,
    pub free_space_offset: u16,

    // Data storage
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            lsn: 0,
            is_dirty: true,
            slots: Vec::new(),
            free_space_offset: PAGE_SIZE as u16,
            data: vec![0; PAGE_SIZE],
        }
    }

    /// Serialize the page to bytes following the documented layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = self.data.clone();
        buffer[..PAGE_HEADER_SIZE].fill(0);

        buffer[0..8].copy_from_slice(&self.page_id.to_le_bytes());
        buffer[8] = self.page_type.as_u8();
        buffer[10..12].copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        buffer[12..14].copy_from_slice(&self.free_space_offset.to_le_bytes());
        buffer[16..24].copy_from_slice(&self.lsn.to_le_bytes());

        if self.page_type == PageType::Slotted {
            let mut offset = PAGE_HEADER_SIZE;
            for slot in &self.slots {
                buffer[offset..offset + 2].copy_from_slice(&slot.offset.to_le_bytes());
                buffer[offset + 2..offset + 4].copy_from_slice(&slot.length.to_le_bytes());
                buffer[offset + 4..offset + 6].copy_from_slice(&slot.flags.as_u16().to_le_bytes());
                offset += SLOT_DIRECTORY_ENTRY_SIZE;
            }
        }

        let checksum = calculate_page_checksum(&buffer);
        buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        buffer
    }

    /// Deserialize a page from bytes following the documented layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() != PAGE_SIZE {
            return Err(DatabaseError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }

        let page_id = u64::from_le_bytes(read_array(bytes, 0));
        let page_type = PageType::from_u8(bytes[8])?;
        let slot_count = u16::from_le_bytes(read_array(bytes, 10)) as usize;
        let free_space_offset = u16::from_le_bytes(read_array(bytes, 12));
        let lsn = u64::from_le_bytes(read_array(bytes, 16));
        let expected_checksum = u32::from_le_bytes(read_array(bytes, CHECKSUM_OFFSET));

        if !verify_page_checksum(bytes, expected_checksum) {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: "checksum mismatch".to_string(),
            });
        }

        if free_space_offset as usize > PAGE_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("Invalid free_space_offset: {}", free_space_offset),
            });
        }

        let mut slots = Vec::new();
        if page_type == PageType::Slotted {
            let directory_end = PAGE_HEADER_SIZE + slot_count * SLOT_DIRECTORY_ENTRY_SIZE;
            if directory_end > free_space_offset as usize {
                return Err(DatabaseError::CorruptedPage {
                    page_id,
                    reason: "Slot directory extends into cell data".to_string(),
                });
            }

            slots.reserve(slot_count);
            let mut offset = PAGE_HEADER_SIZE;
            for _ in 0..slot_count {
                let slot_offset = u16::from_le_bytes(read_array(bytes, offset));
                let length = u16::from_le_bytes(read_array(bytes, offset + 2));
                let raw_flags = u16::from_le_bytes(read_array(bytes, offset + 4));
                offset += SLOT_DIRECTORY_ENTRY_SIZE;

                let flags = SlotFlags::from_u16(raw_flags).ok_or_else(|| {
                    DatabaseError::CorruptedPage {
                        page_id,
                        reason: format!("Unknown slot flags {}", raw_flags),
                    }
                })?;

                if slot_offset as usize + length as usize > PAGE_SIZE {
                    return Err(DatabaseError::CorruptedPage {
                        page_id,
                        reason: format!(
                            "Slot at offset {} with length {} exceeds page boundary",
                            slot_offset, length
                        ),
                    });
                }

                slots.push(SlotEntry {
                    offset: slot_offset,
                    length,
                    flags,
                });
            }
        }

        Ok(Page {
            page_id,
            page_type,
            lsn,
            is_dirty: false, // Freshly loaded page is not dirty
            slots,
            free_space_offset,
            data: bytes.to_vec(),
        })
    }

    pub fn slot(&self, slot: SlotId) -> Option<&SlotEntry> {
        self.slots.get(slot as usize)
    }

    fn directory_end(&self, slot_count: usize) -> usize {
        PAGE_HEADER_SIZE + slot_count * SLOT_DIRECTORY_ENTRY_SIZE
    }

    pub fn available_space(&self) -> usize {
        (self.free_space_offset as usize).saturating_sub(self.directory_end(self.slots.len()))
    }

    /// Bytes of cell data that survive a compaction.
    fn kept_bytes(&self, reserved: &HashSet<SlotId>) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| !slot.is_free() || reserved.contains(&(*index as SlotId)))
            .map(|(_, slot)| slot.length as usize)
            .sum()
    }

    /// Picks the slot a new cell of `cell_len` bytes would go to, without
    /// touching the page. Free slots in `reserved` are never handed out.
    pub fn find_slot(&self, cell_len: usize, reserved: &HashSet<SlotId>) -> Option<SlotId> {
        let reusable = self
            .slots
            .iter()
            .enumerate()
            .position(|(index, slot)| slot.is_free() && !reserved.contains(&(index as SlotId)));

        let (slot, slot_count) = match reusable {
            Some(index) => (index, self.slots.len()),
            None => (self.slots.len(), self.slots.len() + 1),
        };
        if slot_count > u16::MAX as usize {
            return None;
        }

        let needed = self.directory_end(slot_count) + self.kept_bytes(reserved) + cell_len;
        (needed <= PAGE_SIZE).then_some(slot as SlotId)
    }

    /// Makes `slot` hold a zeroed cell of `cell_len` bytes, compacting the
    /// page if the contiguous free space is too small.
    pub fn install(
        &mut self,
        slot: SlotId,
        cell_len: usize,
        flags: SlotFlags,
        reserved: &HashSet<SlotId>,
    ) -> Result<(), DatabaseError> {
        let index = slot as usize;

        if let Some(entry) = self.slots.get(index).copied() {
            if !entry.is_free() {
                return Err(DatabaseError::CorruptedPage {
                    page_id: self.page_id,
                    reason: format!("slot {} is already in use", slot),
                });
            }
            // The tombstone of a restored record is still in place
            if entry.length as usize == cell_len && entry.offset != 0 {
                let start = entry.offset as usize;
                self.data[start..start + cell_len].fill(0);
                self.slots[index].flags = flags;
                self.is_dirty = true;
                return Ok(());
            }
            self.slots[index] = SlotEntry::EMPTY;
        }

        let slot_count = self.slots.len().max(index + 1);
        let growth = self.directory_end(slot_count) - self.directory_end(self.slots.len());
        if self.available_space() < growth + cell_len {
            let mut keep = reserved.clone();
            keep.remove(&slot);
            self.compact_page(&keep);
        }
        if self.available_space() < growth + cell_len {
            return Err(DatabaseError::PageFull {
                page_id: self.page_id,
            });
        }

        self.slots.resize(slot_count, SlotEntry::EMPTY);

        let new_offset = self.free_space_offset - cell_len as u16;
        let start = new_offset as usize;
        self.data[start..start + cell_len].fill(0);
        self.slots[index] = SlotEntry {
            offset: new_offset,
            length: cell_len as u16,
            flags,
        };
        self.free_space_offset = new_offset;
        self.is_dirty = true;
        Ok(())
    }

    /// Marks a live slot free. The cell stays behind as a tombstone.
    pub fn release(&mut self, slot: SlotId) -> Result<(), DatabaseError> {
        match self.slots.get_mut(slot as usize) {
            Some(entry) if !entry.is_free() => {
                entry.flags = SlotFlags::Free;
                self.is_dirty = true;
                Ok(())
            }
            _ => Err(DatabaseError::CorruptedPage {
                page_id: self.page_id,
                reason: format!("slot {} is not allocated", slot),
            }),
        }
    }

    pub fn get_cell(&self, slot: SlotId) -> Option<&[u8]> {
        let entry = self.slots.get(slot as usize)?;
        if entry.is_free() {
            return None;
        }
        let start = entry.offset as usize;
        Some(&self.data[start..start + entry.length as usize])
    }

    pub fn get_cell_mut(&mut self, slot: SlotId) -> Option<&mut [u8]> {
        let entry = *self.slots.get(slot as usize)?;
        if entry.is_free() {
            return None;
        }
        self.is_dirty = true;
        let start = entry.offset as usize;
        Some(&mut self.data[start..start + entry.length as usize])
    }

    pub fn blob_data(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    pub fn blob_data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    // Defragment the page by moving all kept cells to the end of the page
    fn compact_page(&mut self, reserved: &HashSet<SlotId>) {
        let mut kept: Vec<(usize, SlotEntry)> = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.length > 0 && (!slot.is_free() || reserved.contains(&(index as SlotId))) {
                kept.push((index, *slot));
            } else if slot.is_free() {
                *slot = SlotEntry::EMPTY;
            }
        }

        // Sort slots by their current offset (highest to lowest) to maintain order
        kept.sort_by(|a, b| b.1.offset.cmp(&a.1.offset));

        let cells: Vec<Vec<u8>> = kept
            .iter()
            .map(|(_, slot)| {
                let start = slot.offset as usize;
                self.data[start..start + slot.length as usize].to_vec()
            })
            .collect();

        let mut current_offset = PAGE_SIZE;
        for ((index, slot), cell) in kept.iter().zip(cells) {
            current_offset -= slot.length as usize;
            self.data[current_offset..current_offset + cell.len()].copy_from_slice(&cell);
            self.slots[*index].offset = current_offset as u16;
        }

        // Clear the space that's now free
        let directory_end = self.directory_end(self.slots.len());
        self.data[directory_end..current_offset].fill(0);

        self.free_space_offset = current_offset as u16;
        self.is_dirty = true;
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}
