use std::{collections::HashMap, fmt};

use tracing::debug;

use crate::{
    types::{
        Lsn, TransactionId,
        error::{DatabaseError, Result},
    },
    wal::entry::PageAction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Prepared,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "active",
            TransactionState::Prepared => "prepared",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Undo step of one logged update.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoRecord {
    pub lsn: Lsn,
    pub action: PageAction,
}

#[derive(Debug, Clone)]
pub struct TransactionLog {
    pub state: TransactionState,
    /// Last log entry written for the transaction.
    pub prev_lsn: Option<Lsn>,
    /// Updates in the order they were logged.
    pub undo: Vec<UndoRecord>,
}

impl TransactionLog {
    pub fn new(state: TransactionState) -> Self {
        Self {
            state,
            prev_lsn: None,
            undo: Vec::new(),
        }
    }
}

/// Unresolved transactions. Committed and aborted ones leave the table.
#[derive(Debug)]
pub struct TransactionTable {
    transactions: HashMap<TransactionId, TransactionLog>,
    next_xid: TransactionId,
    max_active: usize,
}

impl TransactionTable {
    pub fn new(next_xid: TransactionId, max_active: usize) -> Self {
        Self {
            transactions: HashMap::new(),
            next_xid: next_xid.max(1),
            max_active,
        }
    }

    pub fn next_xid(&self) -> TransactionId {
        self.next_xid
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn begin(&mut self) -> Result<TransactionId> {
        if self.transactions.len() >= self.max_active {
            return Err(DatabaseError::ResourceExhausted {
                resource: format!("transaction slots ({} open)", self.max_active),
            });
        }
        if self.next_xid == TransactionId::MAX {
            return Err(DatabaseError::ResourceExhausted {
                resource: "transaction ids".to_string(),
            });
        }
        let xid = self.next_xid;
        self.next_xid += 1;
        self.transactions
            .insert(xid, TransactionLog::new(TransactionState::Active));
        debug!(xid, open = self.transactions.len(), "began transaction");
        Ok(xid)
    }

    pub fn get(&self, xid: TransactionId) -> Result<&TransactionLog> {
        self.transactions
            .get(&xid)
            .ok_or(DatabaseError::TransactionNotActive { xid })
    }

    /// The transaction, if it may still change records.
    pub fn writable(&mut self, xid: TransactionId, operation: &'static str) -> Result<&mut TransactionLog> {
        let transaction = self
            .transactions
            .get_mut(&xid)
            .ok_or(DatabaseError::TransactionNotActive { xid })?;
        if transaction.state != TransactionState::Active {
            return Err(DatabaseError::InvalidTransactionState {
                xid,
                state: transaction.state.to_string(),
                operation,
            });
        }
        Ok(transaction)
    }

    /// Remembers a log entry of `xid`, with its undo step if it is an update.
    pub fn record(&mut self, xid: TransactionId, lsn: Lsn, undo: Option<PageAction>) {
        if let Some(transaction) = self.transactions.get_mut(&xid) {
            transaction.prev_lsn = Some(lsn);
            if let Some(action) = undo {
                transaction.undo.push(UndoRecord { lsn, action });
            }
        }
    }

    pub fn set_state(&mut self, xid: TransactionId, state: TransactionState) {
        if let Some(transaction) = self.transactions.get_mut(&xid) {
            transaction.state = state;
        }
    }

    /// Removes a resolved transaction from the table.
    pub fn finish(&mut self, xid: TransactionId) -> Option<TransactionLog> {
        self.transactions.remove(&xid)
    }

    /// Puts back a transaction rebuilt by recovery.
    pub fn restore(&mut self, xid: TransactionId, transaction: TransactionLog) {
        self.next_xid = self.next_xid.max(xid.saturating_add(1));
        self.transactions.insert(xid, transaction);
    }

    pub fn ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.transactions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn ids_in(&self, state: TransactionState) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, transaction)| transaction.state == state)
            .map(|(xid, _)| *xid)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, xid: TransactionId) -> bool {
        self.transactions.contains_key(&xid)
    }
}
