use crate::{
    index::hash_table::HashIndex,
    types::{
        INVALID_XID, TransactionId,
        error::{DatabaseError, Result},
        record_id::RecordId,
    },
};

/// Forward-only iteration over key/value pairs.
///
/// `key` and `value` return `Ok(None)` when there is no current tuple
/// (before the first `advance` or after `tuple_done`); that does not mean
/// iteration is over. Only `advance` returning `false` ends it, after which
/// both fail with `CursorExhausted`.
pub trait Cursor {
    /// Moves to the next tuple; `false` once there are no more.
    fn advance(&mut self) -> Result<bool>;

    fn key(&self) -> Result<Option<&[u8]>>;

    fn value(&self) -> Result<Option<&[u8]>>;

    /// Releases the current tuple.
    fn tuple_done(&mut self);

    fn close(self)
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Fresh,
    Positioned,
    TupleDone,
    Exhausted,
}

/// Cursor over one hash table, in bucket order. The directory is captured
/// when the cursor opens.
pub struct HashCursor<'e> {
    index: HashIndex<'e>,
    xid: TransactionId,
    table: RecordId,
    directory: Vec<RecordId>,
    bucket: usize,
    next: RecordId,
    current: Option<(Vec<u8>, Vec<u8>)>,
    state: CursorState,
}

impl<'e> HashCursor<'e> {
    pub fn open(index: HashIndex<'e>, xid: TransactionId, table: RecordId) -> Result<Self> {
        let header = index.header(xid, table)?;
        let directory = index.directory(xid, &header)?;
        Ok(Self {
            index,
            xid,
            table,
            directory,
            bucket: 0,
            next: RecordId::Null,
            current: None,
            state: CursorState::Fresh,
        })
    }

    pub fn table(&self) -> RecordId {
        self.table
    }

    pub fn xid(&self) -> TransactionId {
        self.xid
    }

    fn tuple(&self) -> Result<Option<&(Vec<u8>, Vec<u8>)>> {
        match self.state {
            CursorState::Exhausted => Err(DatabaseError::CursorExhausted),
            CursorState::Positioned => Ok(self.current.as_ref()),
            CursorState::Fresh | CursorState::TupleDone => Ok(None),
        }
    }
}

impl Cursor for HashCursor<'_> {
    fn advance(&mut self) -> Result<bool> {
        if self.state == CursorState::Exhausted {
            return Ok(false);
        }
        if self.xid != INVALID_XID && !self.index.engine().is_active(self.xid)? {
            return Err(DatabaseError::TransactionNotActive { xid: self.xid });
        }

        while self.next.is_null() {
            match self.directory.get(self.bucket) {
                Some(head) => {
                    self.next = *head;
                    self.bucket += 1;
                }
                None => {
                    self.state = CursorState::Exhausted;
                    self.current = None;
                    return Ok(false);
                }
            }
        }

        let entry = self.next;
        let header = self.index.entry_header(self.xid, entry)?;
        let key = self.index.entry_key(self.xid, entry, &header)?;
        let value = self.index.entry_value(self.xid, entry, &header)?;
        self.next = header.next;
        self.current = Some((key, value));
        self.state = CursorState::Positioned;
        Ok(true)
    }

    fn key(&self) -> Result<Option<&[u8]>> {
        Ok(self.tuple()?.map(|(key, _)| key.as_slice()))
    }

    fn value(&self) -> Result<Option<&[u8]>> {
        Ok(self.tuple()?.map(|(_, value)| value.as_slice()))
    }

    fn tuple_done(&mut self) {
        if self.state == CursorState::Positioned {
            self.current = None;
            self.state = CursorState::TupleDone;
        }
    }

    fn close(self) {}
}
