use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    storage::page_cache::PageCache,
    types::{
        BLOB_DESCRIPTOR_SIZE, BLOB_PAGE_CAPACITY, BLOB_THRESHOLD_SIZE, Lsn, PageId, SlotId,
        TransactionId,
        error::{DatabaseError, Result},
        page::{Page, PageType, SlotFlags},
        record_id::{RecordId, RecordType},
    },
    wal::entry::PageAction,
};

/// Run of consecutive blob pages holding one large record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobExtent {
    pub first_page: PageId,
    pub page_count: u32,
}

impl BlobExtent {
    /// Extent for a record of `size` bytes; `None` when it needs more
    /// pages than an extent can count.
    pub fn for_size(first_page: PageId, size: usize) -> Option<Self> {
        let page_count = u32::try_from(size.div_ceil(BLOB_PAGE_CAPACITY)).ok()?;
        Some(Self {
            first_page,
            page_count,
        })
    }

    pub fn pages(&self) -> impl Iterator<Item = PageId> {
        let first = self.first_page;
        (0..self.page_count as u64).map(move |index| first + index)
    }

    fn descriptor(&self, size: usize) -> [u8; BLOB_DESCRIPTOR_SIZE] {
        let mut cell = [0u8; BLOB_DESCRIPTOR_SIZE];
        cell[0..8].copy_from_slice(&self.first_page.to_le_bytes());
        cell[8..16].copy_from_slice(&(size as u64).to_le_bytes());
        cell
    }

    fn from_descriptor(cell: &[u8]) -> Option<(Self, usize)> {
        if cell.len() != BLOB_DESCRIPTOR_SIZE {
            return None;
        }
        let first_page = u64::from_le_bytes(cell[0..8].try_into().ok()?);
        let size = u64::from_le_bytes(cell[8..16].try_into().ok()?) as usize;
        Some((Self::for_size(first_page, size)?, size))
    }
}

/// Where a live record is stored and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub page: PageId,
    pub slot: SlotId,
    pub size: usize,
    pub blob: Option<BlobExtent>,
}

/// A record with an uncommitted change. `committed` is what every other
/// transaction sees: the bytes as of the owner's first touch, or `None` when
/// the owner allocated it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub owner: TransactionId,
    pub committed: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Normal operation and rollback: always apply.
    Forward,
    /// Recovery: skip pages that already carry the change.
    Redo,
}

/// Record layer over the page cache. Every change arrives as a logged
/// `PageAction`; reads resolve visibility against pending records.
pub struct RecordStore {
    cache: PageCache,
    pending: HashMap<(PageId, SlotId), PendingRecord>,
    alloc_hint: PageId,
}

impl RecordStore {
    pub fn new(cache: PageCache) -> Self {
        Self {
            cache,
            pending: HashMap::new(),
            alloc_hint: 1,
        }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PageCache {
        &mut self.cache
    }

    fn fetch_existing(&mut self, page_id: PageId) -> Result<&mut Page> {
        self.cache
            .fetch(page_id)?
            .ok_or_else(|| DatabaseError::CorruptedPage {
                page_id,
                reason: "referenced page was never written".to_string(),
            })
    }

    /// Size and blob extent of whatever is allocated at `(page, slot)`.
    fn stored(&mut self, page_id: PageId, slot: SlotId) -> Result<Option<(usize, Option<BlobExtent>)>> {
        if page_id == 0 || page_id > self.cache.page_count() {
            return Ok(None);
        }
        let Some(page) = self.cache.fetch(page_id)? else {
            return Ok(None);
        };
        if page.page_type != PageType::Slotted {
            return Ok(None);
        }
        let Some(entry) = page.slot(slot).copied() else {
            return Ok(None);
        };
        match entry.flags {
            SlotFlags::Free => Ok(None),
            SlotFlags::Normal => Ok(Some((entry.length as usize, None))),
            SlotFlags::Blob => {
                let cell = page.get_cell(slot).unwrap_or_default();
                let (extent, size) =
                    BlobExtent::from_descriptor(cell).ok_or_else(|| DatabaseError::CorruptedPage {
                        page_id,
                        reason: format!("bad blob descriptor in slot {}", slot),
                    })?;
                Ok(Some((size, Some(extent))))
            }
        }
    }

    /// Current location of `rid`, ignoring visibility.
    pub fn resolve(&mut self, rid: RecordId) -> Result<RecordLocation> {
        let (page, slot) = rid.location().ok_or(DatabaseError::InvalidRecord { rid })?;
        let (size, blob) = self
            .stored(page, slot)?
            .ok_or(DatabaseError::InvalidRecord { rid })?;
        if rid.size() != Some(size) {
            return Err(DatabaseError::InvalidRecord { rid });
        }
        Ok(RecordLocation {
            page,
            slot,
            size,
            blob,
        })
    }

    fn foreign_pending(&self, xid: TransactionId, rid: RecordId) -> Option<&PendingRecord> {
        let key = rid.location()?;
        self.pending.get(&key).filter(|pending| pending.owner != xid)
    }

    /// Bytes of `rid` in `range` as `xid` sees them.
    pub fn read_visible(
        &mut self,
        xid: TransactionId,
        rid: RecordId,
        range: Option<Range<usize>>,
    ) -> Result<Vec<u8>> {
        if let Some(pending) = self.foreign_pending(xid, rid) {
            let image = pending
                .committed
                .as_ref()
                .ok_or(DatabaseError::InvalidRecord { rid })?;
            if rid.size() != Some(image.len()) {
                return Err(DatabaseError::InvalidRecord { rid });
            }
            let range = checked_range(rid, image.len(), range)?;
            return Ok(image[range].to_vec());
        }
        let location = self.resolve(rid)?;
        let range = checked_range(rid, location.size, range)?;
        self.read_location(&location, range)
    }

    /// Stored size of `rid` as `xid` sees it.
    pub fn visible_size(&mut self, xid: TransactionId, rid: RecordId) -> Result<usize> {
        if let Some(pending) = self.foreign_pending(xid, rid) {
            return match &pending.committed {
                Some(image) if rid.size() == Some(image.len()) => Ok(image.len()),
                _ => Err(DatabaseError::InvalidRecord { rid }),
            };
        }
        Ok(self.resolve(rid)?.size)
    }

    pub fn visible_type(&mut self, xid: TransactionId, rid: RecordId) -> RecordType {
        match self.visible_size(xid, rid) {
            Ok(size) if size > BLOB_THRESHOLD_SIZE => RecordType::Blob,
            Ok(_) => RecordType::Normal,
            Err(_) => RecordType::Invalid,
        }
    }

    pub fn read_location(&mut self, location: &RecordLocation, range: Range<usize>) -> Result<Vec<u8>> {
        match location.blob {
            None => {
                let page = self.fetch_existing(location.page)?;
                let page_id = page.page_id;
                let cell = page
                    .get_cell(location.slot)
                    .ok_or_else(|| DatabaseError::CorruptedPage {
                        page_id,
                        reason: format!("slot {} vanished", location.slot),
                    })?;
                Ok(cell[range].to_vec())
            }
            Some(extent) => {
                let mut bytes = Vec::with_capacity(range.len());
                let mut position = range.start;
                while position < range.end {
                    let page_id = extent.first_page + (position / BLOB_PAGE_CAPACITY) as u64;
                    let within = position % BLOB_PAGE_CAPACITY;
                    let take = (BLOB_PAGE_CAPACITY - within).min(range.end - position);
                    let page = self.fetch_existing(page_id)?;
                    bytes.extend_from_slice(&page.blob_data()[within..within + take]);
                    position += take;
                }
                Ok(bytes)
            }
        }
    }

    /// Free slots on `page_id` that a pending transaction may still need.
    fn reserved_slots(&self, page_id: PageId) -> HashSet<SlotId> {
        self.pending
            .keys()
            .filter(|(page, _)| *page == page_id)
            .map(|(_, slot)| *slot)
            .collect()
    }

    /// Picks where a new record of `size` bytes goes, passing over slots
    /// `locked` reports for a page. Nothing changes until the matching
    /// `Alloc` action is applied.
    pub fn plan_alloc(
        &mut self,
        size: usize,
        locked: impl Fn(PageId) -> HashSet<SlotId>,
    ) -> Result<(RecordId, Option<BlobExtent>)> {
        let cell_len = if size > BLOB_THRESHOLD_SIZE {
            BLOB_DESCRIPTOR_SIZE
        } else {
            size
        };

        let hint = self.alloc_hint;
        let mut reserved = self.reserved_slots(hint);
        reserved.extend(locked(hint));
        let reusable = match self.cache.fetch(hint)? {
            Some(page) if page.page_type == PageType::Slotted => page.find_slot(cell_len, &reserved),
            _ => None,
        };

        let (page, slot, fresh_pages) = match reusable {
            Some(slot) => (hint, slot, 0),
            None => {
                // Slot 0 of a page nobody wrote yet can still be locked
                let mut skipped = 0;
                while locked(self.cache.next_page_id(skipped)?).contains(&0) {
                    skipped += 1;
                }
                (self.cache.next_page_id(skipped)?, 0, skipped + 1)
            }
        };

        let blob = if size > BLOB_THRESHOLD_SIZE {
            let first_page = self.cache.next_page_id(fresh_pages)?;
            let extent = BlobExtent::for_size(first_page, size).ok_or_else(|| {
                DatabaseError::ResourceExhausted {
                    resource: format!("blob extent for {} bytes", size),
                }
            })?;
            self.cache
                .next_page_id(fresh_pages + extent.page_count as u64 - 1)?;
            Some(extent)
        } else {
            None
        };

        if page != hint {
            debug!(page, previous = hint, "moving allocation to a fresh page");
            self.alloc_hint = page;
        }
        Ok((RecordId::new(page, slot, size), blob))
    }

    /// Applies a logged action. Pages touched get `lsn` as their page LSN.
    pub fn apply(&mut self, action: &PageAction, lsn: Lsn, mode: ApplyMode) -> Result<()> {
        match action {
            PageAction::Alloc { rid, blob } => self.install(*rid, *blob, None, lsn, mode),
            PageAction::Restore { rid, blob, bytes } => {
                self.install(*rid, *blob, Some(bytes), lsn, mode)
            }
            PageAction::Free { rid, .. } => {
                let (page_id, slot) = rid.location().ok_or(DatabaseError::InvalidRecord { rid: *rid })?;
                let page = self.fetch_existing(page_id)?;
                if mode == ApplyMode::Redo && page.lsn >= lsn {
                    return Ok(());
                }
                page.release(slot)?;
                page.lsn = lsn;
                Ok(())
            }
            PageAction::Set {
                rid,
                blob,
                offset,
                bytes,
            } => {
                let offset = *offset as usize;
                match blob {
                    Some(extent) => self.write_blob(*extent, offset, bytes, lsn, mode),
                    None => {
                        let (page_id, slot) =
                            rid.location().ok_or(DatabaseError::InvalidRecord { rid: *rid })?;
                        let page = self.fetch_existing(page_id)?;
                        if mode == ApplyMode::Redo && page.lsn >= lsn {
                            return Ok(());
                        }
                        let cell = page
                            .get_cell_mut(slot)
                            .ok_or(DatabaseError::InvalidRecord { rid: *rid })?;
                        let end = offset
                            .checked_add(bytes.len())
                            .filter(|end| *end <= cell.len())
                            .ok_or(DatabaseError::RecordTooSmall {
                                rid: *rid,
                                size: cell.len(),
                                len: offset.saturating_add(bytes.len()),
                            })?;
                        cell[offset..end].copy_from_slice(bytes);
                        page.lsn = lsn;
                        Ok(())
                    }
                }
            }
        }
    }

    fn install(
        &mut self,
        rid: RecordId,
        blob: Option<BlobExtent>,
        contents: Option<&[u8]>,
        lsn: Lsn,
        mode: ApplyMode,
    ) -> Result<()> {
        let (page_id, slot) = rid.location().ok_or(DatabaseError::InvalidRecord { rid })?;
        let size = rid.size().unwrap_or(0);
        let reserved = self.reserved_slots(page_id);

        let page = self.cache.get_or_create(page_id, PageType::Slotted)?;
        if !(mode == ApplyMode::Redo && page.lsn >= lsn) {
            let (cell_len, flags) = match blob {
                Some(_) => (BLOB_DESCRIPTOR_SIZE, SlotFlags::Blob),
                None => (size, SlotFlags::Normal),
            };
            page.install(slot, cell_len, flags, &reserved)?;
            let cell = page
                .get_cell_mut(slot)
                .ok_or(DatabaseError::InvalidRecord { rid })?;
            match (blob, contents) {
                (Some(extent), _) => cell.copy_from_slice(&extent.descriptor(size)),
                (None, Some(bytes)) => {
                    let len = bytes.len().min(cell.len());
                    cell[..len].copy_from_slice(&bytes[..len]);
                }
                (None, None) => {}
            }
            page.lsn = lsn;
        }

        if let Some(extent) = blob {
            for page_id in extent.pages() {
                let page = self.cache.get_or_create(page_id, PageType::Blob)?;
                if mode == ApplyMode::Redo && page.lsn >= lsn {
                    continue;
                }
                page.blob_data_mut().fill(0);
                page.lsn = lsn;
            }
            if let Some(bytes) = contents {
                self.write_blob(extent, 0, bytes, lsn, mode)?;
            }
        }
        Ok(())
    }

    fn write_blob(
        &mut self,
        extent: BlobExtent,
        offset: usize,
        bytes: &[u8],
        lsn: Lsn,
        mode: ApplyMode,
    ) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let position = offset + written;
            let index = position / BLOB_PAGE_CAPACITY;
            if index >= extent.page_count as usize {
                return Err(DatabaseError::CorruptedPage {
                    page_id: extent.first_page,
                    reason: format!("write at {} runs past the blob extent", position),
                });
            }
            let within = position % BLOB_PAGE_CAPACITY;
            let take = (BLOB_PAGE_CAPACITY - within).min(bytes.len() - written);
            let page = self.fetch_existing(extent.first_page + index as u64)?;
            if !(mode == ApplyMode::Redo && page.lsn > lsn) {
                page.blob_data_mut()[within..within + take]
                    .copy_from_slice(&bytes[written..written + take]);
                page.lsn = lsn;
            }
            written += take;
        }
        Ok(())
    }

    /// Remembers the committed image of `rid` before `xid` first changes it.
    pub fn note_pending(&mut self, xid: TransactionId, rid: RecordId) -> Result<()> {
        let key = rid.location().ok_or(DatabaseError::InvalidRecord { rid })?;
        if self.pending.contains_key(&key) {
            return Ok(());
        }
        let committed = self.current_image(key)?;
        self.pending.insert(key, PendingRecord { owner: xid, committed });
        Ok(())
    }

    /// Full contents of whatever is allocated at `key` right now.
    pub fn current_image(&mut self, key: (PageId, SlotId)) -> Result<Option<Vec<u8>>> {
        match self.stored(key.0, key.1)? {
            Some((size, blob)) => {
                let location = RecordLocation {
                    page: key.0,
                    slot: key.1,
                    size,
                    blob,
                };
                Ok(Some(self.read_location(&location, 0..size)?))
            }
            None => Ok(None),
        }
    }

    pub fn insert_pending(&mut self, key: (PageId, SlotId), record: PendingRecord) {
        self.pending.insert(key, record);
    }

    /// Drops the committed images kept for `xid` once it resolves.
    pub fn release_pending(&mut self, xid: TransactionId) {
        self.pending.retain(|_, pending| pending.owner != xid);
    }
}

fn checked_range(rid: RecordId, size: usize, range: Option<Range<usize>>) -> Result<Range<usize>> {
    let range = range.unwrap_or(0..size);
    if range.start > range.end || range.end > size {
        return Err(DatabaseError::RecordTooSmall {
            rid,
            size,
            len: range.end,
        });
    }
    Ok(range)
}
