//! Per-item run status
//!
//! Tracks, for each item, whether a run is executing, how many runs are
//! queued behind it, and how the last finished run ended. Finished entries
//! are evicted oldest-first once the registry grows past its capacity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Idle items remembered before the oldest are forgotten
pub const DEFAULT_STATUS_CAPACITY: usize = 1024;

/// Lifecycle of the runs for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Waiting for a run on the same item to finish
    Pending,
    Running,
    Completed,
    Failed,
}

/// Snapshot of one item's runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    /// A run is executing now
    pub active: bool,
    /// Runs waiting behind the active one
    pub queued: usize,
    /// Outcome of the last finished run
    pub last: Option<RunState>,
}

impl RunStatus {
    /// Running while a run executes, Pending while only queued runs remain,
    /// otherwise the last outcome
    pub fn state(&self) -> Option<RunState> {
        if self.active {
            Some(RunState::Running)
        } else if self.queued > 0 {
            Some(RunState::Pending)
        } else {
            self.last
        }
    }

    fn is_idle(&self) -> bool {
        !self.active && self.queued == 0
    }
}

#[derive(Debug)]
struct Entry {
    status: RunStatus,
    /// Order in which the entry last went idle
    finished_seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    seq: u64,
}

/// Shared run bookkeeping for an orchestrator
#[derive(Debug)]
pub struct RunRegistry {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STATUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a run that is about to wait for its item
    pub fn enqueue(&self, item_id: &str) -> RunTicket<'_> {
        let mut inner = self.inner();
        inner
            .entries
            .entry(item_id.to_string())
            .or_insert_with(|| Entry {
                status: RunStatus::default(),
                finished_seq: 0,
            })
            .status
            .queued += 1;

        RunTicket {
            registry: self,
            item_id: item_id.to_string(),
            phase: Phase::Queued,
        }
    }

    pub fn status(&self, item_id: &str) -> Option<RunStatus> {
        self.inner().entries.get(item_id).map(|e| e.status)
    }

    /// Items currently tracked
    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(&self, item_id: &str) {
        if let Some(entry) = self.inner().entries.get_mut(item_id) {
            entry.status.queued = entry.status.queued.saturating_sub(1);
            entry.status.active = true;
        }
    }

    fn dequeue(&self, item_id: &str) {
        let mut inner = self.inner();
        let forget = match inner.entries.get_mut(item_id) {
            Some(entry) => {
                entry.status.queued = entry.status.queued.saturating_sub(1);
                entry.status.is_idle() && entry.status.last.is_none()
            }
            None => false,
        };
        if forget {
            inner.entries.remove(item_id);
        }
    }

    fn finish(&self, item_id: &str, state: RunState) {
        let mut inner = self.inner();
        inner.seq += 1;
        let seq = inner.seq;
        if let Some(entry) = inner.entries.get_mut(item_id) {
            entry.status.active = false;
            entry.status.last = Some(state);
            entry.finished_seq = seq;
        }
        self.evict(&mut inner);
    }

    fn evict(&self, inner: &mut Inner) {
        let excess = inner.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let mut idle: Vec<(u64, String)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.status.is_idle())
            .map(|(id, e)| (e.finished_seq, id.clone()))
            .collect();
        idle.sort_unstable();

        for (_, item_id) in idle.into_iter().take(excess) {
            inner.entries.remove(&item_id);
        }
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Active,
    Done,
}

/// One run's claim on its item's status.
///
/// Dropped while queued, it leaves the queue. Dropped while active, the run
/// is recorded as failed.
#[derive(Debug)]
pub struct RunTicket<'a> {
    registry: &'a RunRegistry,
    item_id: String,
    phase: Phase,
}

impl RunTicket<'_> {
    /// The run holds its item and is executing
    pub fn start(&mut self) {
        if self.phase == Phase::Queued {
            self.registry.start(&self.item_id);
            self.phase = Phase::Active;
        }
    }

    pub fn finish(mut self, state: RunState) {
        if self.phase == Phase::Queued {
            self.registry.dequeue(&self.item_id);
        }
        self.registry.finish(&self.item_id, state);
        self.phase = Phase::Done;
    }
}

impl Drop for RunTicket<'_> {
    fn drop(&mut self) {
        match self.phase {
            Phase::Queued => self.registry.dequeue(&self.item_id),
            Phase::Active => {
                warn!(item_id = %self.item_id, "Run dropped before finishing");
                self.registry.finish(&self.item_id, RunState::Failed);
            }
            Phase::Done => {}
        }
    }
}
