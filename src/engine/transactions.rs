use tracing::debug;

use crate::{
    engine::{Engine, EngineState},
    storage::record_manager::ApplyMode,
    transaction::TransactionState,
    types::{
        TransactionId,
        error::{DatabaseError, Result},
    },
    wal::entry::LogBody,
};

impl EngineState {
    /// State of `xid` if it may still commit or abort.
    fn resolvable(&self, xid: TransactionId, operation: &'static str) -> Result<TransactionState> {
        let transaction = self.transactions.get(xid)?;
        match transaction.state {
            TransactionState::Active | TransactionState::Prepared => Ok(transaction.state),
            state => Err(DatabaseError::InvalidTransactionState {
                xid,
                state: state.to_string(),
                operation,
            }),
        }
    }

    /// Undoes every update of `xid` in reverse, logging a compensation
    /// record for each, then logs the abort.
    fn roll_back(&mut self, xid: TransactionId) -> Result<usize> {
        let (mut prev_lsn, mut undo) = {
            let transaction = self.transactions.get(xid)?;
            (transaction.prev_lsn, transaction.undo.clone())
        };
        let undone = undo.len();
        while let Some(record) = undo.pop() {
            let undo_next = undo.last().map(|previous| previous.lsn);
            let lsn = self.log.append(
                xid,
                prev_lsn,
                LogBody::Compensation {
                    redo: record.action.clone(),
                    undo_next,
                },
            )?;
            if let Err(e) = self.store.apply(&record.action, lsn, ApplyMode::Forward) {
                self.failed = true;
                return Err(e);
            }
            prev_lsn = Some(lsn);
        }
        self.log.append(xid, prev_lsn, LogBody::Abort)?;
        Ok(undone)
    }
}

impl Engine {
    /// Starts a transaction and returns its id.
    pub fn begin(&self) -> Result<TransactionId> {
        self.run(|state| state.transactions.begin())
    }

    /// Commits `xid` and forces the log so the commit survives a crash.
    pub fn commit(&self, xid: TransactionId) -> Result<()> {
        self.finish_commit(xid, true)
    }

    /// Commits `xid` without forcing the log. The commit becomes durable
    /// with the next `force_commits`, forced commit or checkpoint.
    pub fn soft_commit(&self, xid: TransactionId) -> Result<()> {
        self.finish_commit(xid, false)
    }

    fn finish_commit(&self, xid: TransactionId, force: bool) -> Result<()> {
        self.run(|state| {
            state.resolvable(xid, "commit")?;
            let prev_lsn = state.transactions.get(xid)?.prev_lsn;
            let lsn = state.log.append(xid, prev_lsn, LogBody::Commit)?;
            if force {
                state.log.force()?;
            }
            state.transactions.finish(xid);
            state.store.release_pending(xid);
            self.locks().unlock_all(xid);
            debug!(xid, lsn, force, "committed transaction");
            Ok(())
        })
    }

    /// Forces every logged commit to stable storage.
    pub fn force_commits(&self) -> Result<()> {
        self.run(|state| state.log.force())
    }

    /// Rolls back every change of `xid` and releases its locks.
    pub fn abort(&self, xid: TransactionId) -> Result<()> {
        self.run(|state| {
            state.resolvable(xid, "abort")?;
            let undone = state.roll_back(xid)?;
            state.transactions.finish(xid);
            state.store.release_pending(xid);
            self.locks().unlock_all(xid);
            debug!(xid, undone, "aborted transaction");
            Ok(())
        })
    }

    /// First phase of two-phase commit: forces the log with a prepare
    /// record. The transaction keeps its locks, may no longer write, and
    /// survives a crash until it is committed or aborted.
    pub fn prepare(&self, xid: TransactionId) -> Result<()> {
        self.run(|state| {
            let prev_lsn = state.transactions.writable(xid, "prepare")?.prev_lsn;
            let lsn = state.log.append(xid, prev_lsn, LogBody::Prepare)?;
            state.log.force()?;
            state.transactions.record(xid, lsn, None);
            state.transactions.set_state(xid, TransactionState::Prepared);
            debug!(xid, lsn, "prepared transaction");
            Ok(())
        })
    }

    /// Writes all dirty pages and records a checkpoint. Returns whether the
    /// log could be truncated.
    pub fn checkpoint(&self) -> Result<bool> {
        self.run(|state| state.checkpoint())
    }

    /// Ids of transactions that are active or prepared.
    pub fn active_transactions(&self) -> Result<Vec<TransactionId>> {
        self.run(|state| Ok(state.transactions.ids()))
    }

    pub fn is_active(&self, xid: TransactionId) -> Result<bool> {
        self.run(|state| Ok(state.transactions.contains(xid)))
    }

    /// State of an unresolved transaction, `None` once it is gone.
    pub fn transaction_state(&self, xid: TransactionId) -> Result<Option<TransactionState>> {
        self.run(|state| Ok(state.transactions.get(xid).ok().map(|transaction| transaction.state)))
    }
}
