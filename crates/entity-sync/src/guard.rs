//! Ordering / idempotency guard.
//!
//! Arrival order on the single connection is the total order; the guard never
//! reorders. It only recognises a re-delivery of the event most recently
//! admitted for the same `(entity type, id)` within the dedup window.

use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::event::{CanonicalEvent, EntityType, EventPayload};

pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 2_000;
pub const DEFAULT_GUARD_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum GuardVerdict {
    Fresh,
    Duplicate { first_seen_at_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mark {
    fingerprint: String,
    received_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    window_ms: u64,
    capacity: usize,
    marks: HashMap<(EntityType, String), Mark>,
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW_MS, DEFAULT_GUARD_CAPACITY)
    }
}

impl IdempotencyGuard {
    /// A zero window disables duplicate detection.
    #[must_use]
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            window_ms,
            capacity: capacity.max(1),
            marks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.marks.len()
    }

    /// Duplicate iff every targeted id was last admitted with the same
    /// fingerprint inside the window. Fresh events replace the marks of all
    /// their ids.
    pub fn admit(&mut self, event: &CanonicalEvent) -> GuardVerdict {
        let fingerprint = event_fingerprint(event);
        let now = event.received_at_ms;

        if self.window_ms > 0 {
            let first_seen = event
                .ids
                .iter()
                .map(|id| {
                    self.marks
                        .get(&(event.entity_type, id.clone()))
                        .filter(|mark| {
                            mark.fingerprint == fingerprint
                                && now.saturating_sub(mark.received_at_ms) <= self.window_ms
                        })
                        .map(|mark| mark.received_at_ms)
                })
                .collect::<Option<Vec<_>>>();
            if let Some(first_seen) = first_seen
                && let Some(first_seen_at_ms) = first_seen.into_iter().min()
            {
                return GuardVerdict::Duplicate { first_seen_at_ms };
            }
        }

        for id in &event.ids {
            self.marks.insert(
                (event.entity_type, id.clone()),
                Mark {
                    fingerprint: fingerprint.clone(),
                    received_at_ms: now,
                },
            );
        }
        if self.marks.len() > self.capacity {
            self.prune(now);
        }
        GuardVerdict::Fresh
    }

    fn prune(&mut self, now: u64) {
        let window_ms = self.window_ms;
        self.marks
            .retain(|_, mark| now.saturating_sub(mark.received_at_ms) <= window_ms);
        if self.marks.len() <= self.capacity {
            return;
        }
        let mut by_age = self
            .marks
            .iter()
            .map(|(key, mark)| (mark.received_at_ms, key.clone()))
            .collect::<Vec<_>>();
        by_age.sort_by_key(|(received_at_ms, _)| *received_at_ms);
        let excess = self.marks.len() - self.capacity;
        for (_, key) in by_age.into_iter().take(excess) {
            self.marks.remove(&key);
        }
    }
}

/// SHA-256 over entity type, action, ids and payload, hex encoded.
#[must_use]
pub fn event_fingerprint(event: &CanonicalEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.entity_type.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(event.action().as_str().as_bytes());
    for id in &event.ids {
        hasher.update(b"|");
        hasher.update(id.as_bytes());
    }
    hasher.update(b"|");
    let payload = match &event.payload {
        EventPayload::Created(record) | EventPayload::Updated(record) => {
            serde_json::to_vec(record).unwrap_or_default()
        }
        EventPayload::Deleted => Vec::new(),
    };
    hasher.update(&payload);
    hex::encode(hasher.finalize())
}
