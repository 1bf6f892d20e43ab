//! Restart recovery: analysis, redo from the last checkpoint, undo of
//! transactions that never resolved, and re-instatement of prepared ones.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::{
    storage::record_manager::{ApplyMode, PendingRecord, RecordStore},
    transaction::{RecordKey, TransactionLog, TransactionState, UndoRecord},
    types::{Lsn, TransactionId, error::Result},
    wal::{
        entry::LogBody,
        log_file::{LogScan, LogWriter},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub entries_scanned: usize,
    pub checkpoint_lsn: Option<Lsn>,
    pub redone: usize,
    pub undone: usize,
    pub rolled_back: Vec<TransactionId>,
    pub prepared: Vec<TransactionId>,
}

/// A prepared transaction rebuilt from the log, with the records it must
/// keep locked.
#[derive(Debug)]
pub struct PreparedTransaction {
    pub xid: TransactionId,
    pub log: TransactionLog,
    pub keys: Vec<RecordKey>,
}

#[derive(Debug)]
pub struct RecoveryOutcome {
    pub stats: RecoveryStats,
    pub next_xid: TransactionId,
    pub prepared: Vec<PreparedTransaction>,
}

/// What the log says about one transaction.
struct Analysis {
    state: TransactionState,
    last_lsn: Lsn,
    undo: Vec<UndoRecord>,
}

pub fn recover(
    scan: &LogScan,
    store: &mut RecordStore,
    log: &mut LogWriter,
    stored_next_xid: TransactionId,
) -> Result<RecoveryOutcome> {
    let mut stats = RecoveryStats {
        entries_scanned: scan.entries.len(),
        ..RecoveryStats::default()
    };
    let mut next_xid = stored_next_xid;
    let mut redo_from = 0;
    let mut transactions: BTreeMap<TransactionId, Analysis> = BTreeMap::new();

    // Analysis
    for (index, entry) in scan.entries.iter().enumerate() {
        if let LogBody::Checkpoint { next_xid: logged, .. } = entry.body {
            next_xid = next_xid.max(logged);
            redo_from = index;
            stats.checkpoint_lsn = Some(entry.lsn);
            continue;
        }
        next_xid = next_xid.max(entry.xid.saturating_add(1));

        let analysis = transactions.entry(entry.xid).or_insert_with(|| Analysis {
            state: TransactionState::Active,
            last_lsn: entry.lsn,
            undo: Vec::new(),
        });
        analysis.last_lsn = entry.lsn;
        match &entry.body {
            LogBody::Update { undo, .. } => analysis.undo.push(UndoRecord {
                lsn: entry.lsn,
                action: undo.clone(),
            }),
            LogBody::Compensation { undo_next, .. } => {
                analysis
                    .undo
                    .retain(|record| undo_next.is_some_and(|next| record.lsn <= next));
                // Rolling back a prepared transaction means it was aborted
                analysis.state = TransactionState::Active;
            }
            LogBody::Prepare => analysis.state = TransactionState::Prepared,
            LogBody::Commit => analysis.state = TransactionState::Committed,
            LogBody::Abort => analysis.state = TransactionState::Aborted,
            LogBody::Checkpoint { .. } => {}
        }
    }

    // Redo
    for entry in &scan.entries[redo_from..] {
        let redo = match &entry.body {
            LogBody::Update { redo, .. } | LogBody::Compensation { redo, .. } => redo,
            _ => continue,
        };
        store.apply(redo, entry.lsn, ApplyMode::Redo)?;
        stats.redone += 1;
    }
    debug!(redone = stats.redone, from = redo_from, "redo pass finished");

    // Prepared transactions get their pending images back before any undo
    // so their freed slots stay reserved.
    let mut prepared = Vec::new();
    for (xid, analysis) in &transactions {
        if analysis.state != TransactionState::Prepared {
            continue;
        }
        let keys = reinstate_pending(store, *xid, &analysis.undo)?;
        prepared.push(PreparedTransaction {
            xid: *xid,
            log: TransactionLog {
                state: TransactionState::Prepared,
                prev_lsn: Some(analysis.last_lsn),
                undo: analysis.undo.clone(),
            },
            keys,
        });
        stats.prepared.push(*xid);
    }

    // Undo, across all losers in reverse log order
    let mut losers: HashMap<TransactionId, (Lsn, Vec<UndoRecord>)> = transactions
        .iter()
        .filter(|(_, analysis)| analysis.state == TransactionState::Active)
        .map(|(xid, analysis)| (*xid, (analysis.last_lsn, analysis.undo.clone())))
        .collect();
    let mut pending_undo: Vec<(Lsn, TransactionId)> = losers
        .iter()
        .flat_map(|(xid, (_, undo))| undo.iter().map(move |record| (record.lsn, *xid)))
        .collect();
    pending_undo.sort_unstable_by(|a, b| b.cmp(a));

    for (_, xid) in pending_undo {
        let Some((last_lsn, undo)) = losers.get_mut(&xid) else {
            continue;
        };
        let Some(record) = undo.pop() else {
            continue;
        };
        let undo_next = undo.last().map(|previous| previous.lsn);
        let lsn = log.append(
            xid,
            Some(*last_lsn),
            LogBody::Compensation {
                redo: record.action.clone(),
                undo_next,
            },
        )?;
        store.apply(&record.action, lsn, ApplyMode::Forward)?;
        *last_lsn = lsn;
        stats.undone += 1;
    }

    let mut rolled_back: Vec<TransactionId> = losers.keys().copied().collect();
    rolled_back.sort_unstable();
    for xid in &rolled_back {
        let last_lsn = losers.get(xid).map(|(lsn, _)| *lsn);
        log.append(*xid, last_lsn, LogBody::Abort)?;
    }
    stats.rolled_back = rolled_back;

    info!(
        entries = stats.entries_scanned,
        redone = stats.redone,
        undone = stats.undone,
        rolled_back = stats.rolled_back.len(),
        prepared = stats.prepared.len(),
        "recovery finished"
    );

    Ok(RecoveryOutcome {
        stats,
        next_xid,
        prepared,
    })
}

/// Rebuilds the committed image of every record a prepared transaction
/// touched by running its undo steps backwards over the current contents.
fn reinstate_pending(
    store: &mut RecordStore,
    xid: TransactionId,
    undo: &[UndoRecord],
) -> Result<Vec<RecordKey>> {
    let mut images: HashMap<RecordKey, Option<Vec<u8>>> = HashMap::new();
    let mut keys = Vec::new();
    for record in undo.iter().rev() {
        let Some(key) = record.action.rid().location() else {
            continue;
        };
        if !images.contains_key(&key) {
            images.insert(key, store.current_image(key)?);
            keys.push(key);
        }
        if let Some(image) = images.get_mut(&key) {
            record.action.apply_to_image(image);
        }
    }
    for key in &keys {
        let committed = images.remove(key).flatten();
        store.insert_pending(*key, PendingRecord { owner: xid, committed });
    }
    Ok(keys)
}

