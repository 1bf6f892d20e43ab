use thiserror::Error;

use crate::types::{PageId, TransactionId, record_id::RecordId};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record {rid}")]
    InvalidRecord { rid: RecordId },

    #[error("Record {rid} holds {size} bytes, write of {len} bytes rejected")]
    RecordTooSmall { rid: RecordId, size: usize, len: usize },

    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    #[error("Cursor is exhausted")]
    CursorExhausted,

    #[error("Recovery failed: {reason}")]
    RecoveryFailure { reason: String },

    #[error("Transaction {xid} is not active")]
    TransactionNotActive { xid: TransactionId },

    #[error("Transaction {xid} cannot {operation} while {state}")]
    InvalidTransactionState {
        xid: TransactionId,
        state: String,
        operation: &'static str,
    },

    #[error("Deadlock detected, transaction {xid} chosen as victim")]
    Deadlock { xid: TransactionId },

    #[error("Store at '{path}' is already open in this process")]
    EngineAlreadyOpen { path: String },

    #[error("Engine hit a fatal error and must be restarted")]
    RestartRequired,

    #[error("Concurrent access violation")]
    ConcurrencyError,

    #[error("Page is full (page_id: {page_id})")]
    PageFull { page_id: PageId },

    #[error("Serialization/deserialization error: {details}")]
    SerializationError { details: String },

    #[error("Invalid page size: {expected} bytes, got {actual} bytes")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Corrupted page: page_id={page_id}, reason={reason}")]
    CorruptedPage { page_id: PageId, reason: String },

    #[error("Invalid page type: {0}")]
    InvalidPageType(u8),

    #[error("Invalid store header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Corrupted hash index {table}: {reason}")]
    CorruptedIndex { table: RecordId, reason: String },
}

impl DatabaseError {
    /// I/O and recovery failures leave the engine in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DatabaseError::Io(_)
                | DatabaseError::RecoveryFailure { .. }
                | DatabaseError::CorruptedPage { .. }
        )
    }

    pub fn recovery(reason: impl Into<String>) -> Self {
        DatabaseError::RecoveryFailure {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
