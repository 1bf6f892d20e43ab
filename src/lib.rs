pub mod config;
pub mod engine;
pub mod index;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod utils;
pub mod wal;

pub use config::EngineConfig;
pub use engine::Engine;
pub use index::{Cursor, HashCursor, InsertOutcome, RemoveOutcome};
pub use types::{
    INVALID_XID, TransactionId,
    error::{DatabaseError, Result},
    record_id::{RecordId, RecordType},
};
