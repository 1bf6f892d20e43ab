use tracing::debug;

use crate::{
    engine::Engine,
    types::{
        TransactionId,
        error::{DatabaseError, Result},
        record_id::{RECORD_ID_ENCODED_SIZE, RecordId},
    },
    utils::hash::bucket_hash,
};

/*
 * Hash table layout, every part an ordinary record
 *
 * header (40):     magic(4) | bucket_count(8) | entry_count(8) | directory rid(20)
 * directory:       bucket_count x head rid(20), NULL for an empty bucket
 * entry:           next rid(20) | key_len(4) | value_len(4) | key | value
 *
 * All integers little endian.
 */

const TABLE_MAGIC: u32 = 0x4C48_5431; // "LHT1"
pub const TABLE_HEADER_SIZE: usize = 4 + 8 + 8 + RECORD_ID_ENCODED_SIZE;
pub const ENTRY_HEADER_SIZE: usize = RECORD_ID_ENCODED_SIZE + 4 + 4;
pub const INITIAL_BUCKETS: u64 = 16;
/// Average chain length that triggers doubling the directory.
const MAX_LOAD: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InsertOutcome {
    Inserted = 0,
    Updated = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub bucket_count: u64,
    pub entry_count: u64,
    pub directory: RecordId,
}

impl TableHeader {
    fn to_bytes(&self) -> [u8; TABLE_HEADER_SIZE] {
        let mut bytes = [0u8; TABLE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&TABLE_MAGIC.to_le_bytes());
        bytes[4..12].copy_from_slice(&self.bucket_count.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes[20..40].copy_from_slice(&self.directory.to_bytes());
        bytes
    }

    fn from_bytes(table: RecordId, bytes: &[u8]) -> Result<Self> {
        let corrupted = |reason: String| DatabaseError::CorruptedIndex { table, reason };
        if bytes.len() != TABLE_HEADER_SIZE {
            return Err(corrupted(format!("header is {} bytes", bytes.len())));
        }
        let magic = u32::from_le_bytes(read_array(bytes, 0));
        if magic != TABLE_MAGIC {
            return Err(corrupted(format!("bad magic {:#010x}", magic)));
        }
        let bucket_count = u64::from_le_bytes(read_array(bytes, 4));
        if bucket_count == 0 || !bucket_count.is_power_of_two() {
            return Err(corrupted(format!("bucket count {} is not a power of two", bucket_count)));
        }
        Ok(Self {
            bucket_count,
            entry_count: u64::from_le_bytes(read_array(bytes, 12)),
            directory: RecordId::from_bytes(&bytes[20..40])?,
        })
    }

    fn bucket_of(&self, key: &[u8]) -> u64 {
        bucket_hash(key) & (self.bucket_count - 1)
    }
}

/// Fixed part of an entry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryHeader {
    pub next: RecordId,
    pub key_len: usize,
    pub value_len: usize,
}

impl EntryHeader {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            next: RecordId::from_bytes(&bytes[0..RECORD_ID_ENCODED_SIZE])?,
            key_len: u32::from_le_bytes(read_array(bytes, 20)) as usize,
            value_len: u32::from_le_bytes(read_array(bytes, 24)) as usize,
        })
    }
}

fn encode_entry(next: RecordId, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENTRY_HEADER_SIZE + key.len() + value.len());
    bytes.extend_from_slice(&next.to_bytes());
    bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
    bytes.extend_from_slice(key);
    bytes.extend_from_slice(value);
    bytes
}

/// Where a key was found: the entry and whatever points at it.
struct Found {
    entry: RecordId,
    header: EntryHeader,
    /// Entry whose next pointer names `entry`; `None` for a bucket head.
    previous: Option<RecordId>,
}

/// Hash table stored in records of `engine`. Writers take the exclusive
/// lock on the table header before touching anything else.
pub struct HashIndex<'e> {
    engine: &'e Engine,
}

impl<'e> HashIndex<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Creates an empty table and returns the id of its header record.
    pub fn create(&self, xid: TransactionId) -> Result<RecordId> {
        let directory = self
            .engine
            .alloc(xid, INITIAL_BUCKETS as usize * RECORD_ID_ENCODED_SIZE)?;
        let table = self.engine.alloc(xid, TABLE_HEADER_SIZE)?;
        let header = TableHeader {
            bucket_count: INITIAL_BUCKETS,
            entry_count: 0,
            directory,
        };
        self.engine.write(xid, table, &header.to_bytes())?;
        debug!(xid, %table, "created hash table");
        Ok(table)
    }

    pub fn header(&self, xid: TransactionId, table: RecordId) -> Result<TableHeader> {
        if table.size() != Some(TABLE_HEADER_SIZE) {
            return Err(DatabaseError::CorruptedIndex {
                table,
                reason: format!("record is not a table header ({:?} bytes)", table.size()),
            });
        }
        let bytes = self.engine.read(xid, table)?;
        TableHeader::from_bytes(table, &bytes)
    }

    /// Locks `table` for a writer and reads its header. A lock taken on a
    /// record that turns out not to be a table is handed back.
    fn locked_header(&self, xid: TransactionId, table: RecordId, operation: &'static str) -> Result<TableHeader> {
        let granted = self.engine.lock_record(xid, table, operation)?;
        self.header(xid, table).inspect_err(|_| {
            if granted {
                self.engine.release_record(xid, table);
            }
        })
    }

    fn write_header(&self, xid: TransactionId, table: RecordId, header: &TableHeader) -> Result<()> {
        self.engine.write(xid, table, &header.to_bytes())
    }

    /// Entire directory as seen by `xid`.
    pub(crate) fn directory(&self, xid: TransactionId, header: &TableHeader) -> Result<Vec<RecordId>> {
        let bytes = self.engine.read(xid, header.directory)?;
        bytes
            .chunks_exact(RECORD_ID_ENCODED_SIZE)
            .take(header.bucket_count as usize)
            .map(RecordId::from_bytes)
            .collect()
    }

    fn bucket_head(&self, xid: TransactionId, header: &TableHeader, bucket: u64) -> Result<RecordId> {
        let start = bucket as usize * RECORD_ID_ENCODED_SIZE;
        let bytes = self
            .engine
            .read_range(xid, header.directory, start..start + RECORD_ID_ENCODED_SIZE)?;
        RecordId::from_bytes(&bytes)
    }

    fn set_bucket_head(
        &self,
        xid: TransactionId,
        header: &TableHeader,
        bucket: u64,
        head: RecordId,
    ) -> Result<()> {
        let start = bucket as usize * RECORD_ID_ENCODED_SIZE;
        self.engine
            .write_range(xid, header.directory, start, &head.to_bytes())
    }

    pub(crate) fn entry_header(&self, xid: TransactionId, entry: RecordId) -> Result<EntryHeader> {
        let bytes = self.engine.read_range(xid, entry, 0..ENTRY_HEADER_SIZE)?;
        EntryHeader::from_bytes(&bytes)
    }

    pub(crate) fn entry_key(&self, xid: TransactionId, entry: RecordId, header: &EntryHeader) -> Result<Vec<u8>> {
        self.engine
            .read_range(xid, entry, ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + header.key_len)
    }

    pub(crate) fn entry_value(&self, xid: TransactionId, entry: RecordId, header: &EntryHeader) -> Result<Vec<u8>> {
        let start = ENTRY_HEADER_SIZE + header.key_len;
        self.engine
            .read_range(xid, entry, start..start + header.value_len)
    }

    fn find(&self, xid: TransactionId, table: &TableHeader, key: &[u8]) -> Result<Option<Found>> {
        let mut previous = None;
        let mut current = self.bucket_head(xid, table, table.bucket_of(key))?;
        while !current.is_null() {
            let header = self.entry_header(xid, current)?;
            if header.key_len == key.len() && self.entry_key(xid, current, &header)? == key {
                return Ok(Some(Found {
                    entry: current,
                    header,
                    previous,
                }));
            }
            previous = Some(current);
            current = header.next;
        }
        Ok(None)
    }

    /// Points whatever referenced `found.entry` at `target`.
    fn relink(&self, xid: TransactionId, table: &TableHeader, key: &[u8], found: &Found, target: RecordId) -> Result<()> {
        match found.previous {
            Some(previous) => self.engine.write_range(xid, previous, 0, &target.to_bytes()),
            None => self.set_bucket_head(xid, table, table.bucket_of(key), target),
        }
    }

    pub fn lookup(&self, xid: TransactionId, table: RecordId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let header = self.header(xid, table)?;
        match self.find(xid, &header, key)? {
            Some(found) => Ok(Some(self.entry_value(xid, found.entry, &found.header)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&self, xid: TransactionId, table: RecordId, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let mut header = self.locked_header(xid, table, "insert")?;

        if let Some(found) = self.find(xid, &header, key)? {
            if found.header.value_len == value.len() {
                let offset = ENTRY_HEADER_SIZE + found.header.key_len;
                self.engine.write_range(xid, found.entry, offset, value)?;
            } else {
                let replacement = self
                    .engine
                    .alloc(xid, ENTRY_HEADER_SIZE + key.len() + value.len())?;
                self.engine
                    .write(xid, replacement, &encode_entry(found.header.next, key, value))?;
                self.relink(xid, &header, key, &found, replacement)?;
                self.engine.dealloc(xid, found.entry)?;
            }
            return Ok(InsertOutcome::Updated);
        }

        let bucket = header.bucket_of(key);
        let head = self.bucket_head(xid, &header, bucket)?;
        let entry = self
            .engine
            .alloc(xid, ENTRY_HEADER_SIZE + key.len() + value.len())?;
        self.engine.write(xid, entry, &encode_entry(head, key, value))?;
        self.set_bucket_head(xid, &header, bucket, entry)?;

        header.entry_count += 1;
        if header.entry_count > header.bucket_count * MAX_LOAD {
            self.grow(xid, table, &mut header)?;
        }
        self.write_header(xid, table, &header)?;
        Ok(InsertOutcome::Inserted)
    }

    pub fn remove(&self, xid: TransactionId, table: RecordId, key: &[u8]) -> Result<RemoveOutcome> {
        let mut header = self.locked_header(xid, table, "remove")?;
        let Some(found) = self.find(xid, &header, key)? else {
            return Ok(RemoveOutcome::NotFound);
        };
        self.relink(xid, &header, key, &found, found.header.next)?;
        self.engine.dealloc(xid, found.entry)?;
        header.entry_count = header.entry_count.saturating_sub(1);
        self.write_header(xid, table, &header)?;
        Ok(RemoveOutcome::Removed)
    }

    /// Doubles the directory and moves every entry to its new bucket. Only
    /// next pointers of entries are rewritten.
    fn grow(&self, xid: TransactionId, table: RecordId, header: &mut TableHeader) -> Result<()> {
        let old_heads = self.directory(xid, header)?;
        let grown = TableHeader {
            bucket_count: header.bucket_count * 2,
            entry_count: header.entry_count,
            directory: RecordId::Null,
        };
        let mut heads = vec![RecordId::Null; grown.bucket_count as usize];

        for head in old_heads {
            let mut current = head;
            while !current.is_null() {
                let entry = self.entry_header(xid, current)?;
                let key = self.entry_key(xid, current, &entry)?;
                let bucket = grown.bucket_of(&key) as usize;
                if entry.next != heads[bucket] {
                    self.engine
                        .write_range(xid, current, 0, &heads[bucket].to_bytes())?;
                }
                heads[bucket] = current;
                current = entry.next;
            }
        }

        let directory = self
            .engine
            .alloc(xid, heads.len() * RECORD_ID_ENCODED_SIZE)?;
        let bytes: Vec<u8> = heads.iter().flat_map(|head| head.to_bytes()).collect();
        self.engine.write(xid, directory, &bytes)?;
        self.engine.dealloc(xid, header.directory)?;

        debug!(
            %table,
            buckets = grown.bucket_count,
            entries = header.entry_count,
            "grew hash table directory"
        );
        header.bucket_count = grown.bucket_count;
        header.directory = directory;
        Ok(())
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}
