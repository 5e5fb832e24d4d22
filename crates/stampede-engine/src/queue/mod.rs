//! The shared event queue.
//!
//! The [`EventQueue`] trait is the coordination point between dispatcher
//! processes, separate from storage concerns. This separation enables:
//!
//! - **Testing**: Use [`memory::InMemoryEventQueue`] for unit tests
//! - **Production**: Back the queue with a shared database
//! - **Flexibility**: Switch implementations without changing dispatch logic
//!
//! ## Design Principles
//!
//! - **Claims, not dequeues**: Claiming leaves the event in place under a
//!   time-bounded lease; only completion removes it
//! - **Lease expiry is crash recovery**: an event whose holder dies becomes
//!   claimable again once the lease lapses
//! - **At-least-once**: an event may therefore be processed more than once,
//!   but never by two holders at the same instant
//!
//! ## Ordering
//!
//! Enqueue assigns a monotonic sequence. Among due, unleased events the
//! lowest sequence is always claimed first.

pub mod memory;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stampede_core::EventId;

use crate::error::Result;
use crate::event::Event;
use crate::run::RunKey;

/// A time-bounded claim on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Worker label that holds the claim.
    pub worker: String,
    /// Token that must accompany completion.
    pub token: String,
    /// Instant the claim lapses.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Returns true if the lease still holds at the given instant.
    #[must_use]
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// An event together with the lease granted on claim.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    /// The claimed event.
    pub event: Event,
    /// The lease protecting it.
    pub lease: Lease,
}

/// Shared queue abstraction for event dispatch.
///
/// Implementations must provide:
/// - Atomic claim of the oldest due event under a lease
/// - Completion gated on the claiming worker and lease token
/// - Pending counts per run for drain detection
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from async tasks.
#[async_trait::async_trait]
pub trait EventQueue: Send + Sync {
    /// Adds an event to the queue and returns its assigned sequence.
    ///
    /// Enqueueing an event whose ID is already queued is a no-op that
    /// returns the existing sequence.
    async fn enqueue(&self, event: Event) -> Result<u64>;

    /// Claims the oldest due, unleased event for a worker.
    ///
    /// Returns `None` when no event is claimable. The granted lease lasts
    /// `lease_duration`; the holder must complete the event before it
    /// lapses or risk a second delivery.
    async fn claim_next(
        &self,
        worker: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedEvent>>;

    /// Removes a claimed event from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::LeaseExpired`] if the event is gone,
    /// the lease lapsed, or the worker and token do not match the current
    /// holder.
    async fn complete(&self, event_id: &EventId, worker: &str, token: &str) -> Result<()>;

    /// Looks up a queued event by ID.
    async fn get(&self, event_id: &EventId) -> Result<Option<Event>>;

    /// Counts queued events assigned to a run, claimed or not.
    async fn count_pending(&self, run: &RunKey) -> Result<usize>;

    /// Returns the total number of queued events.
    async fn depth(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_current_until_expiry() {
        let now = Utc::now();
        let lease = Lease {
            worker: "driver-w0".into(),
            token: "tok".into(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(lease.is_current_at(now));
        assert!(!lease.is_current_at(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn lease_expiring_exactly_now_is_lapsed() {
        let now = Utc::now();
        let lease = Lease {
            worker: "driver-w0".into(),
            token: "tok".into(),
            expires_at: now,
        };
        assert!(!lease.is_current_at(now));
    }
}
