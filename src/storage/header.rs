use crate::{
    storage::{LUMBUNG_HEADER_SIZE, LUMBUNG_MAGIC},
    types::{PAGE_SIZE, PageId, TransactionId, error::DatabaseError},
};

const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    pub magic: [u8; 16],
    pub page_size: u16,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub page_count: PageId,
    pub next_xid: TransactionId,
    pub file_change_counter: u32,
    pub clean_shutdown: bool,
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self {
            magic: *LUMBUNG_MAGIC,
            page_size: PAGE_SIZE as u16,
            file_format_write_version: FORMAT_VERSION,
            file_format_read_version: FORMAT_VERSION,
            page_count: 1,
            next_xid: 1,
            file_change_counter: 1,
            clean_shutdown: true,
        }
    }
}

impl StoreHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(LUMBUNG_HEADER_SIZE);

        buffer.extend_from_slice(&self.magic);
        buffer.extend_from_slice(&self.page_size.to_be_bytes());
        buffer.push(self.file_format_write_version);
        buffer.push(self.file_format_read_version);
        buffer.extend_from_slice(&self.page_count.to_be_bytes());
        buffer.extend_from_slice(&self.next_xid.to_be_bytes());
        buffer.extend_from_slice(&self.file_change_counter.to_be_bytes());
        buffer.push(self.clean_shutdown as u8);

        buffer.resize(LUMBUNG_HEADER_SIZE, 0);
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < LUMBUNG_HEADER_SIZE {
            return Err(DatabaseError::InvalidHeader {
                reason: "Header too short".to_string(),
            });
        }

        let mut offset = 0;

        let mut magic = [0u8; 16];
        magic.copy_from_slice(&bytes[offset..offset + 16]);
        if &magic != LUMBUNG_MAGIC {
            return Err(DatabaseError::InvalidHeader {
                reason: "Invalid Lumbung magic number".to_string(),
            });
        }
        offset += 16;

        let page_size = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        if page_size != PAGE_SIZE as u16 {
            return Err(DatabaseError::InvalidHeader {
                reason: format!("Unsupported page size: {}", page_size),
            });
        }
        offset += 2;

        let file_format_write_version = bytes[offset];
        offset += 1;
        let file_format_read_version = bytes[offset];
        offset += 1;
        if file_format_read_version > FORMAT_VERSION {
            return Err(DatabaseError::InvalidHeader {
                reason: format!("Unsupported file format version: {}", file_format_read_version),
            });
        }

        let mut page_count = [0u8; 8];
        page_count.copy_from_slice(&bytes[offset..offset + 8]);
        offset += 8;

        let mut next_xid = [0u8; 4];
        next_xid.copy_from_slice(&bytes[offset..offset + 4]);
        offset += 4;

        let mut file_change_counter = [0u8; 4];
        file_change_counter.copy_from_slice(&bytes[offset..offset + 4]);
        offset += 4;

        let clean_shutdown = bytes[offset] != 0;

        Ok(Self {
            magic,
            page_size,
            file_format_write_version,
            file_format_read_version,
            page_count: u64::from_be_bytes(page_count),
            next_xid: i32::from_be_bytes(next_xid),
            file_change_counter: u32::from_be_bytes(file_change_counter),
            clean_shutdown,
        })
    }
}
