use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use tracing::debug;

use crate::{
    storage::{LUMBUNG_HEADER_SIZE, header::StoreHeader},
    types::{
        PAGE_SIZE, PageId, ROOT_RECORD_SIZE,
        error::DatabaseError,
        page::{Page, PageType, SlotFlags},
    },
    utils::failpoint,
};

/// Raw page I/O against the store file: a 100-byte header followed by
/// pages numbered from 1.
pub struct PageFile {
    file: File,
    pub header: StoreHeader,
    disk_pages: PageId,
}

impl PageFile {
    /// Formats a new store file holding the header and the root page.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "formatting new page file");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(path)?;

        let header = StoreHeader::default();
        file.write_all(&header.to_bytes())?;
        let root_page = Self::init_root_page()?;
        file.write_all(&root_page.to_bytes())?;
        file.sync_all()?;

        Ok(Self {
            file,
            header,
            disk_pages: 1,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header_buffer = vec![0u8; LUMBUNG_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_buffer)?;
        let mut header = StoreHeader::from_bytes(&header_buffer)?;

        let file_size = file.metadata()?.len();
        let data_size = file_size.saturating_sub(LUMBUNG_HEADER_SIZE as u64);
        let disk_pages = data_size / PAGE_SIZE as u64;
        // Pages evicted after the last header write extend the file
        header.page_count = header.page_count.max(disk_pages);

        debug!(
            path = %path.display(),
            page_count = header.page_count,
            clean_shutdown = header.clean_shutdown,
            "opened page file"
        );

        Ok(Self {
            file,
            header,
            disk_pages,
        })
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        LUMBUNG_HEADER_SIZE as u64 + (page_id - 1) * PAGE_SIZE as u64
    }

    /// Reads a page from disk. Pages that were never written (beyond the end
    /// of the file, or zero-filled holes) read as `None`.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Option<Page>, DatabaseError> {
        if page_id == 0 || page_id > self.disk_pages {
            return Ok(None);
        }
        let mut buffer = vec![0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(self.page_offset(page_id)))?;
        self.file.read_exact(&mut buffer)?;
        if buffer.iter().all(|byte| *byte == 0) {
            return Ok(None);
        }
        let page = Page::from_bytes(&buffer)?;
        if page.page_id != page_id {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("page claims id {}", page.page_id),
            });
        }
        Ok(Some(page))
    }

    pub fn write_page(&mut self, page: &Page) -> Result<(), DatabaseError> {
        failpoint::maybe_fail(failpoint::PAGE_WRITE)?;
        let page_bytes = page.to_bytes();
        self.file.seek(SeekFrom::Start(self.page_offset(page.page_id)))?;
        self.file.write_all(&page_bytes)?;
        self.disk_pages = self.disk_pages.max(page.page_id);
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<(), DatabaseError> {
        self.header.file_change_counter = self.header.file_change_counter.wrapping_add(1);
        let header_bytes = self.header.to_bytes();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header_bytes)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), DatabaseError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn init_root_page() -> Result<Page, DatabaseError> {
        let mut root_page = Page::new(1, PageType::Slotted);
        root_page.install(0, ROOT_RECORD_SIZE, SlotFlags::Normal, &HashSet::new())?;
        Ok(root_page)
    }
}
