use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::types::{
    BLOB_THRESHOLD_SIZE, PageId, ROOT_RECORD_SIZE, SlotId,
    error::{DatabaseError, Result},
};

/// page (8) + slot (4) + size (8)
pub const RECORD_ID_ENCODED_SIZE: usize = 20;

const SENTINEL_SIZE: i64 = -1;
const ROOT_PAGE: PageId = 1;

/// Handle to a stored record.
///
/// `Root` and `Null` are the two sentinel ids of the raw binding form
/// (`{1, 0, -1}` and `{0, 0, -1}`); every other id names a record by page,
/// slot and allocated size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordId {
    Regular {
        page: PageId,
        slot: SlotId,
        size: u64,
    },
    Root,
    Null,
}

impl RecordId {
    pub fn new(page: PageId, slot: SlotId, size: usize) -> Self {
        RecordId::Regular {
            page,
            slot,
            size: size as u64,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RecordId::Null)
    }

    /// Page and slot this id points at. `Null` has no location.
    pub fn location(&self) -> Option<(PageId, SlotId)> {
        match *self {
            RecordId::Regular { page, slot, .. } => Some((page, slot)),
            RecordId::Root => Some((ROOT_PAGE, 0)),
            RecordId::Null => None,
        }
    }

    /// Size carried by the handle. Sentinels report the size of what they
    /// resolve to.
    pub fn size(&self) -> Option<usize> {
        match *self {
            RecordId::Regular { size, .. } => Some(size as usize),
            RecordId::Root => Some(ROOT_RECORD_SIZE),
            RecordId::Null => None,
        }
    }

    pub fn is_blob(&self) -> bool {
        self.size().is_some_and(|size| size > BLOB_THRESHOLD_SIZE)
    }

    /// Raw `{page, slot, size}` triple as seen by the binding layer.
    pub fn to_raw(&self) -> (i64, i32, i64) {
        match *self {
            RecordId::Regular { page, slot, size } => (page as i64, slot as i32, size as i64),
            RecordId::Root => (ROOT_PAGE as i64, 0, SENTINEL_SIZE),
            RecordId::Null => (0, 0, SENTINEL_SIZE),
        }
    }

    pub fn from_raw(page: i64, slot: i32, size: i64) -> Result<Self> {
        if page == 0 {
            return Ok(RecordId::Null);
        }
        if size == SENTINEL_SIZE {
            return if page == ROOT_PAGE as i64 && slot == 0 {
                Ok(RecordId::Root)
            } else {
                Err(DatabaseError::SerializationError {
                    details: format!("unknown sentinel record id {{{page}, {slot}, {size}}}"),
                })
            };
        }
        if page < 0 || slot < 0 || size < 0 {
            return Err(DatabaseError::SerializationError {
                details: format!("negative record id component {{{page}, {slot}, {size}}}"),
            });
        }
        Ok(RecordId::Regular {
            page: page as PageId,
            slot: slot as SlotId,
            size: size as u64,
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_ID_ENCODED_SIZE] {
        let (page, slot, size) = self.to_raw();
        let mut bytes = [0u8; RECORD_ID_ENCODED_SIZE];
        bytes[0..8].copy_from_slice(&page.to_le_bytes());
        bytes[8..12].copy_from_slice(&slot.to_le_bytes());
        bytes[12..20].copy_from_slice(&size.to_le_bytes());
        bytes
    }

    /// Decodes the 20-byte form. A zeroed buffer decodes as `Null`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_ID_ENCODED_SIZE {
            return Err(DatabaseError::SerializationError {
                details: format!(
                    "record id needs {} bytes, got {}",
                    RECORD_ID_ENCODED_SIZE,
                    bytes.len()
                ),
            });
        }
        let page = i64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
        let slot = i32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
        let size = i64::from_le_bytes(bytes[12..20].try_into().unwrap_or_default());
        Self::from_raw(page, slot, size)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Regular { page, slot, size } => write!(f, "{page}:{slot}:{size}"),
            RecordId::Root => write!(f, "ROOT"),
            RecordId::Null => write!(f, "NULL"),
        }
    }
}

impl FromStr for RecordId {
    type Err = DatabaseError;

    /// Parses the `Display` form: `page:slot:size`, `ROOT` or `NULL`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ROOT" | "root" => return Ok(RecordId::Root),
            "NULL" | "null" => return Ok(RecordId::Null),
            _ => {}
        }
        let invalid = || DatabaseError::SerializationError {
            details: format!("'{s}' is not a record id (page:slot:size)"),
        };
        let mut parts = s.trim().split(':');
        let (Some(page), Some(slot), Some(size), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        Ok(RecordId::Regular {
            page: page.parse().map_err(|_| invalid())?,
            slot: slot.parse().map_err(|_| invalid())?,
            size: size.parse().map_err(|_| invalid())?,
        })
    }
}

/// Kind of record stored at a slot, as reported by `record_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Normal,
    Blob,
    Invalid,
}

impl RecordType {
    pub fn as_i32(&self) -> i32 {
        match self {
            RecordType::Normal => -3,
            RecordType::Blob => -2,
            RecordType::Invalid => -1,
        }
    }
}
