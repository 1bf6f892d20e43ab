pub mod cursor;
pub mod hash_table;

pub use cursor::{Cursor, HashCursor};
pub use hash_table::{HashIndex, InsertOutcome, RemoveOutcome, TableHeader};
