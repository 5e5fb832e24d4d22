//! Run lifecycle notifications.

use async_trait::async_trait;

use crate::run::TestRun;

/// Observes run lifecycle transitions made by a dispatcher.
///
/// All methods default to no-ops, so implementations override only the
/// transitions they care about. When several dispatcher processes race
/// over the same transition, only the process whose write won notifies
/// its listeners, so each transition is announced once.
#[async_trait]
pub trait RunListener: Send + Sync {
    /// Called after a run's start was stored and its first event seeded.
    async fn run_started(&self, _run: &TestRun) {}

    /// Called after a drained run's completion was stored.
    async fn run_completed(&self, _run: &TestRun) {}

    /// Called after a run's termination was stored.
    async fn run_terminated(&self, _run: &TestRun) {}
}
