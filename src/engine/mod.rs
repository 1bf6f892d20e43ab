//! The engine: one owned value holding the page cache, the log, the
//! transaction table and the record locks of an open store.

mod index;
mod records;
mod transactions;

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    storage::{
        page_cache::PageCache,
        page_file::PageFile,
        record_manager::{ApplyMode, RecordStore},
    },
    transaction::{LockManager, TransactionState, TransactionTable},
    types::{
        INVALID_XID, Lsn, TransactionId,
        error::{DatabaseError, Result},
    },
    wal::{
        entry::{LogBody, PageAction},
        log_file::{LogReader, LogWriter, create_log},
        recovery::{RecoveryStats, recover},
    },
};

/// Page files currently open in this process.
static OPEN_STORES: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(Default::default);

fn open_stores() -> MutexGuard<'static, HashSet<PathBuf>> {
    OPEN_STORES.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canonical name of a page file, with symlinks resolved. A file that does
/// not exist yet is named through its canonical parent directory.
fn store_key(page_file: &Path) -> Result<PathBuf> {
    if page_file.exists() {
        return Ok(fs::canonicalize(page_file)?);
    }
    let path = std::path::absolute(page_file)?;
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if parent.exists() => Ok(fs::canonicalize(parent)?.join(name)),
        _ => Ok(path),
    }
}

/// Claim on a page file path, released on drop.
struct Registration {
    path: PathBuf,
}

impl Registration {
    fn claim(page_file: &Path) -> Result<Self> {
        let path = store_key(page_file)?;
        if !open_stores().insert(path.clone()) {
            return Err(DatabaseError::EngineAlreadyOpen {
                path: path.display().to_string(),
            });
        }
        Ok(Self { path })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        open_stores().remove(&self.path);
    }
}

/// Everything guarded by the engine latch.
pub(crate) struct EngineState {
    pub(crate) store: RecordStore,
    pub(crate) log: LogWriter,
    pub(crate) transactions: TransactionTable,
    failed: bool,
}

impl EngineState {
    /// Logs an update for `xid` and applies its redo action.
    pub(crate) fn log_update(
        &mut self,
        xid: TransactionId,
        redo: PageAction,
        undo: PageAction,
    ) -> Result<Lsn> {
        let prev_lsn = self.transactions.get(xid)?.prev_lsn;
        let lsn = self.log.append(
            xid,
            prev_lsn,
            LogBody::Update {
                redo: redo.clone(),
                undo: undo.clone(),
            },
        )?;
        if let Err(e) = self.store.apply(&redo, lsn, ApplyMode::Forward) {
            // The log now holds a change the pages never got
            self.failed = true;
            return Err(e);
        }
        self.transactions.record(xid, lsn, Some(undo));
        Ok(lsn)
    }

    /// Forces the log, writes every dirty page and the header, then logs a
    /// checkpoint. The log is truncated when no transaction is unresolved.
    pub(crate) fn checkpoint(&mut self) -> Result<bool> {
        self.log.force()?;
        let next_xid = self.transactions.next_xid();
        self.store.cache_mut().header_mut().next_xid = next_xid;
        let flushed = self.store.cache_mut().flush_all()?;

        let active = self.transactions.ids();
        let lsn = self.log.append(
            INVALID_XID,
            None,
            LogBody::Checkpoint {
                next_xid,
                active: active.clone(),
                taken_at: chrono::Utc::now().timestamp(),
            },
        )?;
        self.log.force()?;

        let truncated = active.is_empty();
        if truncated {
            self.log.truncate()?;
        }
        info!(lsn, flushed, open = active.len(), truncated, "checkpoint taken");
        Ok(truncated)
    }

    /// Writes back least recently used pages once the cache is over
    /// capacity, forcing the log first if they carry unforced changes.
    fn trim_cache(&mut self) -> Result<()> {
        let cache = self.store.cache();
        if !cache.is_over_capacity() {
            return Ok(());
        }
        let victims = cache.eviction_victims();
        if cache.dirty_lsn(&victims) > self.log.durable_lsn() {
            self.log.force()?;
        }
        self.store.cache_mut().evict(&victims)
    }
}

/// An open store. Shareable across threads; every operation takes `&self`.
pub struct Engine {
    config: EngineConfig,
    state: Mutex<EngineState>,
    locks: LockManager,
    recovery: RecoveryStats,
    _registration: Registration,
}

impl Engine {
    /// Opens the store named by `config`, formatting it if neither file
    /// exists, and runs recovery.
    pub fn init(config: EngineConfig) -> Result<Engine> {
        config.validate()?;
        let registration = Registration::claim(&config.page_file)?;

        let page_exists = config.page_file.exists();
        let log_exists = config.log_file.exists();
        let page_file = match (page_exists, log_exists) {
            (false, false) => {
                info!(page_file = %config.page_file.display(), "formatting new store");
                let page_file = PageFile::create(&config.page_file)?;
                create_log(&config.log_file, 1)?;
                page_file
            }
            (true, true) => PageFile::open(&config.page_file)?,
            (true, false) => {
                return Err(DatabaseError::recovery(format!(
                    "log file '{}' is missing",
                    config.log_file.display()
                )));
            }
            (false, true) => {
                return Err(DatabaseError::recovery(format!(
                    "page file '{}' is missing",
                    config.page_file.display()
                )));
            }
        };
        if !page_file.header.clean_shutdown {
            warn!("store was not shut down cleanly");
        }

        let scan = LogReader::scan(&config.log_file)?;
        let mut log = LogWriter::open(&config.log_file, &scan, config.log_buffer_size)?;
        let mut store = RecordStore::new(PageCache::new(page_file, config.page_cache_capacity));
        let stored_next_xid = store.cache().header().next_xid;
        let outcome = recover(&scan, &mut store, &mut log, stored_next_xid)?;

        let mut transactions =
            TransactionTable::new(outcome.next_xid, config.max_active_transactions);
        let locks = LockManager::new();
        for prepared in outcome.prepared {
            for key in &prepared.keys {
                if !locks.try_lock(prepared.xid, *key) {
                    return Err(DatabaseError::recovery(format!(
                        "prepared transactions {} and {} share record {:?}",
                        prepared.xid,
                        locks.holder(*key).unwrap_or(INVALID_XID),
                        key
                    )));
                }
            }
            debug!(xid = prepared.xid, records = prepared.keys.len(), "re-instated prepared transaction");
            transactions.restore(prepared.xid, prepared.log);
        }

        let mut state = EngineState {
            store,
            log,
            transactions,
            failed: false,
        };
        state.store.cache_mut().header_mut().clean_shutdown = false;
        state.checkpoint()?;

        info!(
            page_file = %config.page_file.display(),
            pages = state.store.cache().page_count(),
            next_xid = state.transactions.next_xid(),
            "store opened"
        );
        Ok(Engine {
            config,
            state: Mutex::new(state),
            locks,
            recovery: outcome.stats,
            _registration: registration,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// What recovery found when the store was opened.
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    /// Aborts transactions that are still active, checkpoints and closes
    /// the store. Prepared transactions stay in the log for the next open.
    pub fn deinit(self) -> Result<()> {
        let active = {
            let state = self.latch()?;
            state.transactions.ids_in(TransactionState::Active)
        };
        for xid in active {
            debug!(xid, "aborting transaction left open at shutdown");
            self.abort(xid)?;
        }

        self.run(|state| {
            let prepared = state.transactions.len();
            state.store.cache_mut().header_mut().clean_shutdown = prepared == 0;
            state.checkpoint()?;
            info!(prepared, "store closed");
            Ok(())
        })
    }

    /// Drops the engine without flushing pages or checkpointing, leaving
    /// the files as a crash would.
    pub fn unclean_shutdown(self) {
        warn!(page_file = %self.config.page_file.display(), "closing store without checkpoint");
        drop(self);
    }

    fn latch(&self) -> Result<MutexGuard<'_, EngineState>> {
        let state = self.state.lock().map_err(|_| DatabaseError::RestartRequired)?;
        if state.failed {
            return Err(DatabaseError::RestartRequired);
        }
        Ok(state)
    }

    /// Runs `operation` under the engine latch. A fatal error marks the
    /// engine failed; every later call then reports `RestartRequired`.
    pub(crate) fn run<T>(&self, operation: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let mut state = self.latch()?;
        let result = operation(&mut state).and_then(|value| {
            state.trim_cache()?;
            Ok(value)
        });
        if let Err(e) = &result {
            if e.is_fatal() {
                state.failed = true;
            }
            if state.failed {
                error!(error = %e, "engine failed, restart required");
            }
        }
        result
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }
}
