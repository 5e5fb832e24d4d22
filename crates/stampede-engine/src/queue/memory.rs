//! In-memory event queue implementation for testing.
//!
//! This module provides [`InMemoryEventQueue`], a simple in-memory
//! implementation of the [`EventQueue`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No cross-process coordination
//! - **Single-process only**: The queue is not shared across process boundaries
//! - **No persistence**: All queued events are lost when the process exits

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use stampede_core::EventId;
use ulid::Ulid;

use super::{ClaimedEvent, EventQueue, Lease};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::run::RunKey;

/// A queued event and the lease on it, if any.
#[derive(Debug)]
struct Entry {
    event: Event,
    lease: Option<Lease>,
}

/// Queue contents, keyed by assigned sequence.
#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<u64, Entry>,
    by_id: HashMap<EventId, u64>,
    next_sequence: u64,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("event queue lock poisoned")
}

/// In-memory event queue for testing.
///
/// Provides a simple, thread-safe implementation of the [`EventQueue`]
/// trait using `RwLock` for synchronization. Claim order follows the
/// `BTreeMap` key order, so the lowest sequence is always scanned first.
///
/// ## Example
///
/// ```rust
/// use stampede_engine::queue::memory::InMemoryEventQueue;
///
/// let queue = InMemoryEventQueue::new();
/// // Use queue in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventQueue {
    state: RwLock<QueueState>,
}

impl InMemoryEventQueue {
    /// Creates a new, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a new unique lease token.
    fn generate_token() -> String {
        Ulid::new().to_string()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(&self, event: Event) -> Result<u64> {
        let mut state = self.state.write().map_err(poison_err)?;

        // Re-enqueueing a queued event is a no-op.
        if let Some(sequence) = state.by_id.get(&event.id) {
            let sequence = *sequence;
            drop(state);
            return Ok(sequence);
        }

        // Sequences are 1-indexed and assigned here; any carried value
        // from a previous queue is replaced.
        state.next_sequence = state.next_sequence.saturating_add(1);
        let sequence = state.next_sequence;

        let mut event = event;
        event.sequence = Some(sequence);
        state.by_id.insert(event.id, sequence);
        state.entries.insert(sequence, Entry { event, lease: None });
        drop(state);

        Ok(sequence)
    }

    async fn claim_next(
        &self,
        worker: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedEvent>> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();

        // Lowest sequence first; skip not-yet-due events and live leases.
        let claimable = state.entries.iter().find_map(|(sequence, entry)| {
            if entry.event.due_at > now {
                return None;
            }
            match &entry.lease {
                Some(lease) if lease.is_current_at(now) => None,
                _ => Some(*sequence),
            }
        });

        let Some(sequence) = claimable else {
            drop(state);
            return Ok(None);
        };

        let lease = Lease {
            worker: worker.to_string(),
            token: Self::generate_token(),
            expires_at: now
                + chrono::Duration::from_std(lease_duration)
                    .unwrap_or(chrono::Duration::seconds(120)),
        };

        let Some(entry) = state.entries.get_mut(&sequence) else {
            drop(state);
            return Ok(None);
        };
        entry.lease = Some(lease.clone());
        let event = entry.event.clone();
        drop(state);

        Ok(Some(ClaimedEvent { event, lease }))
    }

    async fn complete(&self, event_id: &EventId, worker: &str, token: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();

        let Some(sequence) = state.by_id.get(event_id).copied() else {
            drop(state);
            return Err(Error::LeaseExpired {
                event_id: *event_id,
                worker: worker.to_string(),
            });
        };

        let current = state
            .entries
            .get(&sequence)
            .and_then(|entry| entry.lease.as_ref());

        let holds = matches!(
            current,
            Some(lease) if lease.worker == worker
                && lease.token == token
                && lease.is_current_at(now)
        );

        if !holds {
            drop(state);
            return Err(Error::LeaseExpired {
                event_id: *event_id,
                worker: worker.to_string(),
            });
        }

        state.entries.remove(&sequence);
        state.by_id.remove(event_id);
        drop(state);

        Ok(())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<Event>> {
        let state = self.state.read().map_err(poison_err)?;
        let event = state
            .by_id
            .get(event_id)
            .and_then(|sequence| state.entries.get(sequence))
            .map(|entry| entry.event.clone());
        drop(state);

        Ok(event)
    }

    async fn count_pending(&self, run: &RunKey) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        let count = state
            .entries
            .values()
            .filter(|entry| entry.event.run.as_ref() == Some(run))
            .count();
        drop(state);

        Ok(count)
    }

    async fn depth(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        let depth = state.entries.len();
        drop(state);

        Ok(depth)
    }
}
