//! Exclusive record locks with FIFO wait queues and waits-for deadlock
//! detection. Locks are held until the owning transaction resolves.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, warn};

use crate::types::{
    PageId, SlotId, TransactionId,
    error::{DatabaseError, Result},
};

/// Lockable unit: one record slot.
pub type RecordKey = (PageId, SlotId);

#[derive(Debug, Default)]
struct LockQueue {
    waiting: VecDeque<TransactionId>,
    holder: Option<TransactionId>,
}

#[derive(Debug, Default)]
struct WaitQueue {
    queue: Mutex<LockQueue>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<RecordKey, Arc<WaitQueue>>>,
    held: Mutex<HashMap<TransactionId, HashSet<RecordKey>>>,
    waits_for: Mutex<HashMap<TransactionId, TransactionId>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait_queue(&self, key: RecordKey) -> Arc<WaitQueue> {
        guard(&self.table).entry(key).or_default().clone()
    }

    fn record_held(&self, xid: TransactionId, key: RecordKey) {
        guard(&self.held).entry(xid).or_default().insert(key);
    }

    /// Blocks until `xid` holds the exclusive lock on `key`. Fails with
    /// `Deadlock` if waiting would close a cycle; the request is withdrawn
    /// and locks already held are kept.
    pub fn lock(&self, xid: TransactionId, key: RecordKey) -> Result<()> {
        let wait_queue = self.wait_queue(key);
        let mut queue = guard(&wait_queue.queue);

        if queue.holder == Some(xid) {
            return Ok(());
        }
        queue.waiting.push_back(xid);

        loop {
            if queue.holder.is_none() && queue.waiting.front() == Some(&xid) {
                queue.waiting.pop_front();
                queue.holder = Some(xid);
                guard(&self.waits_for).remove(&xid);
                drop(queue);
                self.record_held(xid, key);
                return Ok(());
            }

            let blocker = queue
                .holder
                .or_else(|| queue.waiting.front().copied())
                .filter(|blocker| *blocker != xid);
            if let Some(blocker) = blocker {
                if self.would_deadlock(xid, blocker) {
                    queue.waiting.retain(|waiter| *waiter != xid);
                    // The next waiter may now be at the front
                    wait_queue.cvar.notify_all();
                    warn!(xid, blocker, ?key, "deadlock detected, failing lock request");
                    return Err(DatabaseError::Deadlock { xid });
                }
            }

            queue = wait_queue
                .cvar
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Grants the lock only if nobody holds or waits for it.
    pub fn try_lock(&self, xid: TransactionId, key: RecordKey) -> bool {
        let wait_queue = self.wait_queue(key);
        let mut queue = guard(&wait_queue.queue);
        match queue.holder {
            Some(holder) => holder == xid,
            None if queue.waiting.is_empty() => {
                queue.holder = Some(xid);
                drop(queue);
                self.record_held(xid, key);
                true
            }
            None => false,
        }
    }

    pub fn holder(&self, key: RecordKey) -> Option<TransactionId> {
        let wait_queue = guard(&self.table).get(&key).cloned()?;
        let queue = guard(&wait_queue.queue);
        queue.holder
    }

    /// Slots of `page` that are locked or waited for.
    pub fn locked_slots(&self, page: PageId) -> HashSet<SlotId> {
        guard(&self.table)
            .keys()
            .filter(|(locked_page, _)| *locked_page == page)
            .map(|(_, slot)| *slot)
            .collect()
    }

    /// Records that `xid` waits for `blocker` and reports whether that edge
    /// closes a cycle. On a cycle the edge is not kept.
    fn would_deadlock(&self, xid: TransactionId, blocker: TransactionId) -> bool {
        let mut waits_for = guard(&self.waits_for);
        waits_for.insert(xid, blocker);

        let mut visited = HashSet::new();
        let mut current = blocker;
        while let Some(next) = waits_for.get(&current).copied() {
            if next == xid {
                waits_for.remove(&xid);
                return true;
            }
            if !visited.insert(next) {
                break;
            }
            current = next;
        }
        false
    }

    /// Releases every lock of `xid` and wakes the waiters behind them.
    pub fn unlock_all(&self, xid: TransactionId) {
        guard(&self.waits_for).retain(|waiter, blocker| *waiter != xid && *blocker != xid);
        let keys = guard(&self.held).remove(&xid).unwrap_or_default();
        for key in &keys {
            self.release(xid, *key);
        }
        debug!(xid, released = keys.len(), "released record locks");
    }

    /// Hands back a single lock of `xid` that guards no change yet.
    pub fn unlock(&self, xid: TransactionId, key: RecordKey) {
        let held = guard(&self.held)
            .get_mut(&xid)
            .is_some_and(|keys| keys.remove(&key));
        if held {
            self.release(xid, key);
        }
    }

    fn release(&self, xid: TransactionId, key: RecordKey) {
        let mut table = guard(&self.table);
        let Some(wait_queue) = table.get(&key).cloned() else {
            return;
        };
        let idle = {
            let mut queue = guard(&wait_queue.queue);
            if queue.holder == Some(xid) {
                queue.holder = None;
            }
            queue.waiting.is_empty() && queue.holder.is_none()
        };
        if idle && Arc::strong_count(&wait_queue) == 2 {
            table.remove(&key);
        }
        wait_queue.cvar.notify_all();
    }
}
