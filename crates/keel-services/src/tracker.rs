//! Submission tracking: which entry point each submitted message addressed.
//!
//! The event stream consults this to pick the right output type for a reply
//! (init replies decode as `init_output`, everything else as `handle_output`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use keel_core::{EntryPoint, MessageId, ProgramId};
use tokio::time::Instant;

pub const DEFAULT_TRACKER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedMessage {
    pub program: ProgramId,
    pub entry: EntryPoint,
    pub submitted_at: Instant,
    seq: u64,
}

/// Bounded map of recently submitted messages. Oldest entries are evicted
/// first once `capacity` is reached.
#[derive(Clone)]
pub struct SubmissionTracker {
    entries: Arc<DashMap<MessageId, TrackedMessage>>,
    next_seq: Arc<AtomicU64>,
    capacity: usize,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACKER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Record a submitted message.
    pub fn record(&self, message: MessageId, program: ProgramId, entry: EntryPoint) {
        if !self.entries.contains_key(&message) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            message,
            TrackedMessage {
                program,
                entry,
                submitted_at: Instant::now(),
                seq,
            },
        );
    }

    pub fn get(&self, message: &MessageId) -> Option<TrackedMessage> {
        self.entries.get(message).map(|e| *e)
    }

    /// Entry point a message addressed, if it was submitted through this tracker.
    pub fn entry_of(&self, message: &MessageId) -> Option<EntryPoint> {
        self.entries.get(message).map(|e| e.entry)
    }

    pub fn forget(&self, message: &MessageId) -> Option<TrackedMessage> {
        self.entries.remove(message).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().seq)
            .map(|e| *e.key());
        if let Some(id) = oldest {
            self.entries.remove(&id);
            tracing::debug!(message = %id.short(), "tracker full, evicted oldest submission");
        }
    }
}

impl Default for SubmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}
