use std::collections::HashMap;

use tracing::debug;

use crate::{
    storage::{header::StoreHeader, page_file::PageFile},
    types::{
        Lsn, MAX_PAGE_COUNT, PageId,
        error::DatabaseError,
        page::{Page, PageType},
    },
};

struct CachedPage {
    page: Page,
    last_access: u64,
}

/// In-memory view of the page file. Pages stay cached until the cache grows
/// past its capacity; the least recently used ones are then written back.
/// The owner must force the log past a victim's LSN before evicting it.
pub struct PageCache {
    file: PageFile,
    pages: HashMap<PageId, CachedPage>,
    capacity: usize,
    clock: u64,
}

impl PageCache {
    pub fn new(file: PageFile, capacity: usize) -> Self {
        Self {
            file,
            pages: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    pub fn header(&self) -> &StoreHeader {
        &self.file.header
    }

    pub fn header_mut(&mut self) -> &mut StoreHeader {
        &mut self.file.header
    }

    pub fn page_count(&self) -> PageId {
        self.file.header.page_count
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Id the next freshly allocated page will get.
    pub fn next_page_id(&self, offset: u64) -> Result<PageId, DatabaseError> {
        let page_id = self.page_count() + 1 + offset;
        if page_id > MAX_PAGE_COUNT {
            return Err(DatabaseError::ResourceExhausted {
                resource: format!("page space ({} pages)", MAX_PAGE_COUNT),
            });
        }
        Ok(page_id)
    }

    pub fn fetch(&mut self, page_id: PageId) -> Result<Option<&mut Page>, DatabaseError> {
        self.clock += 1;
        let clock = self.clock;
        if !self.pages.contains_key(&page_id) {
            match self.file.read_page(page_id)? {
                Some(page) => {
                    self.pages.insert(page_id, CachedPage { page, last_access: clock });
                }
                None => return Ok(None),
            }
        }
        Ok(self.pages.get_mut(&page_id).map(|cached| {
            cached.last_access = clock;
            &mut cached.page
        }))
    }

    /// Returns the page, creating an empty one of `page_type` if it was never
    /// written.
    pub fn get_or_create(
        &mut self,
        page_id: PageId,
        page_type: PageType,
    ) -> Result<&mut Page, DatabaseError> {
        if page_id == 0 || page_id > MAX_PAGE_COUNT {
            return Err(DatabaseError::ResourceExhausted {
                resource: format!("page id {} out of range", page_id),
            });
        }
        let exists = self.fetch(page_id)?.is_some();
        if !exists {
            debug!(page_id, ?page_type, "creating page");
            let header = self.header_mut();
            header.page_count = header.page_count.max(page_id);
        }
        let clock = self.clock;
        let cached = self.pages.entry(page_id).or_insert_with(|| CachedPage {
            page: Page::new(page_id, page_type),
            last_access: clock,
        });
        Ok(&mut cached.page)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.pages.len() > self.capacity
    }

    /// Least recently used pages that have to leave to get back to capacity.
    pub fn eviction_victims(&self) -> Vec<PageId> {
        let excess = self.pages.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }
        let mut by_age: Vec<(u64, PageId)> = self
            .pages
            .iter()
            .map(|(page_id, cached)| (cached.last_access, *page_id))
            .collect();
        by_age.sort_unstable();
        by_age.into_iter().take(excess).map(|(_, page_id)| page_id).collect()
    }

    /// Highest LSN among the dirty pages in `page_ids`.
    pub fn dirty_lsn(&self, page_ids: &[PageId]) -> Lsn {
        page_ids
            .iter()
            .filter_map(|page_id| self.pages.get(page_id))
            .filter(|cached| cached.page.is_dirty)
            .map(|cached| cached.page.lsn)
            .max()
            .unwrap_or(0)
    }

    pub fn evict(&mut self, page_ids: &[PageId]) -> Result<(), DatabaseError> {
        for page_id in page_ids {
            if let Some(cached) = self.pages.get(page_id) {
                if cached.page.is_dirty {
                    self.file.write_page(&cached.page)?;
                }
                self.pages.remove(page_id);
            }
        }
        debug!(evicted = page_ids.len(), cached = self.pages.len(), "evicted pages");
        Ok(())
    }

    /// Writes every dirty page and the header, then syncs the file.
    pub fn flush_all(&mut self) -> Result<usize, DatabaseError> {
        let mut dirty: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.page.is_dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty.sort_unstable();

        for page_id in &dirty {
            if let Some(cached) = self.pages.get_mut(page_id) {
                self.file.write_page(&cached.page)?;
                cached.page.is_dirty = false;
            }
        }
        self.file.write_header()?;
        self.file.sync()?;
        Ok(dirty.len())
    }
}
