pub mod header;
pub mod page_cache;
pub mod page_file;
pub mod record_manager;

const LUMBUNG_HEADER_SIZE: usize = crate::types::HEADER_SIZE;
const LUMBUNG_MAGIC: &[u8; 16] = b"LUMBUNG DB v0.1\0";
