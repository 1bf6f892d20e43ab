pub mod error;
pub mod page;
pub mod record_id;

// Common type aliases
pub type PageId = u64;
pub type SlotId = u32;
pub type TransactionId = i32;
pub type Lsn = u64;

/// Pseudo-transaction used for reads of committed state.
pub const INVALID_XID: TransactionId = -1;

pub const PAGE_SIZE: usize = 4096;
pub const MAX_PAGE_COUNT: u64 = 1099511627775; // 2^40 - 1
pub const HEADER_SIZE: usize = 100; // Store file header size
pub const PAGE_HEADER_SIZE: usize = 32; // Per-page header

pub const SLOT_DIRECTORY_ENTRY_SIZE: usize = 6; // offset (2) + length (2) + flags (2)

/// Largest record kept inline in a slotted page. Anything bigger is a blob.
pub const BLOB_THRESHOLD_SIZE: usize = 4000;
/// Bytes of record data carried by one blob page.
pub const BLOB_PAGE_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;
/// Slot cell of a blob record: first_page (8) + size (8).
pub const BLOB_DESCRIPTOR_SIZE: usize = 16;

/// Size of the record behind `RecordId::Root`.
pub const ROOT_RECORD_SIZE: usize = record_id::RECORD_ID_ENCODED_SIZE;

pub const MAX_TRANSACTIONS: usize = 1000;
