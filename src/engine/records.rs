use std::ops::Range;

use tracing::debug;

use crate::{
    engine::{Engine, EngineState},
    types::{
        INVALID_XID, TransactionId,
        error::{DatabaseError, Result},
        record_id::{RecordId, RecordType},
    },
    wal::entry::PageAction,
};

impl Engine {
    /// Takes the exclusive lock on `rid` for `xid`, waiting outside the
    /// engine latch. Ids `xid` cannot see are refused before any lock is
    /// taken. Returns whether this call granted a lock `xid` did not hold.
    /// Locks granted to a transaction that ended meanwhile are handed back.
    pub(crate) fn lock_record(&self, xid: TransactionId, rid: RecordId, operation: &'static str) -> Result<bool> {
        let key = rid.location().ok_or(DatabaseError::InvalidRecord { rid })?;
        self.run(|state| {
            state.transactions.writable(xid, operation)?;
            state.store.visible_size(xid, rid).map(|_| ())
        })?;
        let granted = self.locks().holder(key) != Some(xid);
        self.locks().lock(xid, key)?;
        self.run(|state| match state.transactions.writable(xid, operation) {
            Ok(_) => Ok(granted),
            Err(e @ DatabaseError::TransactionNotActive { .. }) => {
                self.locks().unlock_all(xid);
                Err(e)
            }
            Err(e) => Err(e),
        })
    }

    /// Gives back a lock `lock_record` just granted when the change it
    /// guarded failed before anything was logged.
    pub(crate) fn release_record(&self, xid: TransactionId, rid: RecordId) {
        if let Some(key) = rid.location() {
            self.locks().unlock(xid, key);
        }
    }

    /// Runs `change` under the lock on `rid`, releasing a freshly granted
    /// lock if it fails.
    fn with_record_lock<T>(
        &self,
        xid: TransactionId,
        rid: RecordId,
        operation: &'static str,
        change: impl FnOnce(&mut EngineState) -> Result<T>,
    ) -> Result<T> {
        let granted = self.lock_record(xid, rid, operation)?;
        let result = self.run(change);
        if result.is_err() && granted {
            self.release_record(xid, rid);
        }
        result
    }

    /// Allocates a zero-filled record of `size` bytes. Records larger than a
    /// page are stored as blobs.
    pub fn alloc(&self, xid: TransactionId, size: usize) -> Result<RecordId> {
        self.run(|state| {
            state.transactions.writable(xid, "alloc")?;
            let (rid, blob) = state
                .store
                .plan_alloc(size, |page| self.locks().locked_slots(page))?;
            let key = rid.location().ok_or(DatabaseError::InvalidRecord { rid })?;
            if !self.locks().try_lock(xid, key) {
                return Err(DatabaseError::ConcurrencyError);
            }
            state.store.note_pending(xid, rid)?;
            state.log_update(
                xid,
                PageAction::Alloc { rid, blob },
                PageAction::Free { rid, blob },
            )?;
            debug!(xid, %rid, blob = blob.is_some(), "allocated record");
            Ok(rid)
        })
    }

    /// Frees `rid`. Rolled back, the record comes back at the same slot
    /// with its old contents.
    pub fn dealloc(&self, xid: TransactionId, rid: RecordId) -> Result<()> {
        if rid == RecordId::Root {
            return Err(DatabaseError::InvalidRecord { rid });
        }
        self.with_record_lock(xid, rid, "dealloc", |state| {
            state.transactions.writable(xid, "dealloc")?;
            let location = state.store.resolve(rid)?;
            let bytes = state.store.read_location(&location, 0..location.size)?;
            state.store.note_pending(xid, rid)?;
            let blob = location.blob;
            state.log_update(
                xid,
                PageAction::Free { rid, blob },
                PageAction::Restore { rid, blob, bytes },
            )?;
            Ok(())
        })
    }

    /// Replaces the contents of `rid`. Shorter payloads are zero padded to
    /// the record size; longer ones fail with `RecordTooSmall`.
    pub fn write(&self, xid: TransactionId, rid: RecordId, bytes: &[u8]) -> Result<()> {
        let size = rid.size().ok_or(DatabaseError::InvalidRecord { rid })?;
        if bytes.len() > size {
            return Err(DatabaseError::RecordTooSmall {
                rid,
                size,
                len: bytes.len(),
            });
        }
        let mut padded = bytes.to_vec();
        padded.resize(size, 0);
        self.set_bytes(xid, rid, 0, padded, "write")
    }

    /// Overwrites `bytes.len()` bytes of `rid` starting at `offset`.
    pub fn write_range(&self, xid: TransactionId, rid: RecordId, offset: usize, bytes: &[u8]) -> Result<()> {
        self.set_bytes(xid, rid, offset, bytes.to_vec(), "write")
    }

    fn set_bytes(
        &self,
        xid: TransactionId,
        rid: RecordId,
        offset: usize,
        bytes: Vec<u8>,
        operation: &'static str,
    ) -> Result<()> {
        self.with_record_lock(xid, rid, operation, |state| {
            state.transactions.writable(xid, operation)?;
            let location = state.store.resolve(rid)?;
            let end = offset
                .checked_add(bytes.len())
                .filter(|end| *end <= location.size)
                .ok_or(DatabaseError::RecordTooSmall {
                    rid,
                    size: location.size,
                    len: offset.saturating_add(bytes.len()),
                })?;
            let before = state.store.read_location(&location, offset..end)?;
            state.store.note_pending(xid, rid)?;
            let blob = location.blob;
            state.log_update(
                xid,
                PageAction::Set {
                    rid,
                    blob,
                    offset: offset as u64,
                    bytes,
                },
                PageAction::Set {
                    rid,
                    blob,
                    offset: offset as u64,
                    bytes: before,
                },
            )?;
            Ok(())
        })
    }

    /// Contents of `rid` as `xid` sees them. `INVALID_XID` reads committed
    /// state only.
    pub fn read(&self, xid: TransactionId, rid: RecordId) -> Result<Vec<u8>> {
        self.read_bytes(xid, rid, None)
    }

    pub(crate) fn read_range(&self, xid: TransactionId, rid: RecordId, range: Range<usize>) -> Result<Vec<u8>> {
        self.read_bytes(xid, rid, Some(range))
    }

    fn read_bytes(&self, xid: TransactionId, rid: RecordId, range: Option<Range<usize>>) -> Result<Vec<u8>> {
        self.run(|state| {
            if xid != INVALID_XID {
                state.transactions.get(xid)?;
            }
            state.store.read_visible(xid, rid, range)
        })
    }

    /// Kind of record at `rid`; `Invalid` for anything that is not a live
    /// record visible to `xid`, including any failure to look.
    pub fn record_type(&self, xid: TransactionId, rid: RecordId) -> RecordType {
        self.run(|state| Ok(state.store.visible_type(xid, rid)))
            .unwrap_or(RecordType::Invalid)
    }

    pub fn record_size(&self, xid: TransactionId, rid: RecordId) -> Result<usize> {
        self.run(|state| state.store.visible_size(xid, rid))
    }
}
