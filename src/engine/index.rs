use crate::{
    engine::Engine,
    index::{
        cursor::{Cursor, HashCursor},
        hash_table::{HashIndex, InsertOutcome, RemoveOutcome},
    },
    types::{TransactionId, error::Result, record_id::RecordId},
};

impl Engine {
    pub fn hash_index(&self) -> HashIndex<'_> {
        HashIndex::new(self)
    }

    /// Creates an empty hash table; the returned id names it from now on.
    pub fn hash_create(&self, xid: TransactionId) -> Result<RecordId> {
        self.hash_index().create(xid)
    }

    pub fn hash_insert(
        &self,
        xid: TransactionId,
        table: RecordId,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertOutcome> {
        self.hash_index().insert(xid, table, key, value)
    }

    pub fn hash_remove(&self, xid: TransactionId, table: RecordId, key: &[u8]) -> Result<RemoveOutcome> {
        self.hash_index().remove(xid, table, key)
    }

    pub fn hash_lookup(&self, xid: TransactionId, table: RecordId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.hash_index().lookup(xid, table, key)
    }

    pub fn hash_iterator(&self, xid: TransactionId, table: RecordId) -> Result<HashCursor<'_>> {
        HashCursor::open(self.hash_index(), xid, table)
    }

    pub fn iterator_next(&self, cursor: &mut HashCursor<'_>) -> Result<bool> {
        cursor.advance()
    }

    pub fn iterator_key(&self, cursor: &HashCursor<'_>) -> Result<Option<Vec<u8>>> {
        Ok(cursor.key()?.map(<[u8]>::to_vec))
    }

    pub fn iterator_value(&self, cursor: &HashCursor<'_>) -> Result<Option<Vec<u8>>> {
        Ok(cursor.value()?.map(<[u8]>::to_vec))
    }

    pub fn iterator_tuple_done(&self, cursor: &mut HashCursor<'_>) {
        cursor.tuple_done();
    }

    pub fn iterator_close(&self, cursor: HashCursor<'_>) {
        cursor.close();
    }
}
