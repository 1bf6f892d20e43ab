pub mod lock_manager;
pub mod manager;

pub use lock_manager::{LockManager, RecordKey};
pub use manager::{TransactionLog, TransactionState, TransactionTable, UndoRecord};
