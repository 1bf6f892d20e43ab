use serde::{Deserialize, Serialize};

use crate::{
    storage::record_manager::BlobExtent,
    types::{Lsn, TransactionId, record_id::RecordId},
};

/// A physical change to one record. Every update log entry carries one of
/// these to redo it and another to undo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageAction {
    /// Reserve a zero-filled record at the id's page and slot.
    Alloc {
        rid: RecordId,
        blob: Option<BlobExtent>,
    },
    /// Free the record, leaving its cell as a tombstone.
    Free {
        rid: RecordId,
        blob: Option<BlobExtent>,
    },
    /// Install `bytes` at `offset` inside the record.
    Set {
        rid: RecordId,
        blob: Option<BlobExtent>,
        offset: u64,
        bytes: Vec<u8>,
    },
    /// Bring a freed record back at the same slot with its old contents.
    Restore {
        rid: RecordId,
        blob: Option<BlobExtent>,
        bytes: Vec<u8>,
    },
}

impl PageAction {
    pub fn rid(&self) -> RecordId {
        match self {
            PageAction::Alloc { rid, .. }
            | PageAction::Free { rid, .. }
            | PageAction::Set { rid, .. }
            | PageAction::Restore { rid, .. } => *rid,
        }
    }

    /// Applies the action to a detached copy of the record's bytes; `None`
    /// stands for "not allocated".
    pub fn apply_to_image(&self, image: &mut Option<Vec<u8>>) {
        match self {
            PageAction::Alloc { rid, .. } => {
                *image = Some(vec![0u8; rid.size().unwrap_or(0)]);
            }
            PageAction::Free { .. } => *image = None,
            PageAction::Set { offset, bytes, .. } => {
                if let Some(current) = image.as_mut() {
                    let start = *offset as usize;
                    let end = (start + bytes.len()).min(current.len());
                    if start < end {
                        current[start..end].copy_from_slice(&bytes[..end - start]);
                    }
                }
            }
            PageAction::Restore { bytes, .. } => *image = Some(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogBody {
    Update {
        redo: PageAction,
        undo: PageAction,
    },
    /// Redo-only record written while undoing an update; `undo_next` is the
    /// next entry of the transaction still to be undone.
    Compensation {
        redo: PageAction,
        undo_next: Option<Lsn>,
    },
    Prepare,
    Commit,
    Abort,
    Checkpoint {
        next_xid: TransactionId,
        active: Vec<TransactionId>,
        taken_at: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub lsn: Lsn,
    pub xid: TransactionId,
    pub prev_lsn: Option<Lsn>,
    pub body: LogBody,
}

impl LogEntry {
    pub fn is_checkpoint(&self) -> bool {
        matches!(self.body, LogBody::Checkpoint { .. })
    }
}
