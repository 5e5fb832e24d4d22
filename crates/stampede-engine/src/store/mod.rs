//! Pluggable storage for run state.
//!
//! The [`RunStore`] trait defines the persistence layer for runs and their
//! properties. Event queueing is handled separately by
//! [`crate::queue::EventQueue`].
//!
//! ## Design Principles
//!
//! - **CAS semantics**: Every run mutation compares the caller's observed
//!   version and rejects stale writers
//! - **Separation of concerns**: Storage is independent of the queue
//! - **Testability**: In-memory implementation for testing, a shared
//!   database for production
//!
//! ## CAS Semantics
//!
//! The versioned transition methods are the core primitive for distributed
//! correctness: when several dispatcher processes race to move the same
//! run, exactly one write lands. A successful write stores
//! `expected_version + 1` and returns it; a stale write fails with
//! [`crate::error::Error::VersionConflict`] and leaves the record
//! untouched, so the loser can re-read and retry or stand down.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::run::{RunKey, RunProperty, RunState, TestRun};

/// Storage abstraction for run state.
///
/// Implementations must provide:
/// - Durability appropriate for the deployment (in-memory for tests, a
///   shared database for production)
/// - CAS semantics for run state transitions
/// - Efficient queries for dispatcher polling
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from
/// multiple dispatcher tasks.
#[async_trait]
pub trait RunStore: Send + Sync {
    // --- Run Lifecycle ---

    /// Creates a run together with its property defaults.
    ///
    /// Each entry in `defaults` becomes a [`RunProperty`] at version 0
    /// with no override set.
    ///
    /// # Errors
    ///
    /// Fails with a storage error if a run with the same key exists.
    async fn create(&self, run: TestRun, defaults: HashMap<String, String>) -> Result<()>;

    /// Gets a run by key.
    ///
    /// Returns `None` if the run does not exist.
    async fn get(&self, key: &RunKey) -> Result<Option<TestRun>>;

    /// Lists all runs of a test, ordered by run name.
    async fn list(&self, test: &str) -> Result<Vec<TestRun>>;

    /// Lists all runs currently in the given state.
    async fn runs_in_state(&self, state: RunState) -> Result<Vec<TestRun>>;

    // --- Versioned Transitions ---

    /// Schedules a run to start at `scheduled_at`.
    ///
    /// Returns the run's new version.
    ///
    /// # Errors
    ///
    /// - [`crate::error::Error::RunNotFound`] if the run does not exist
    /// - [`crate::error::Error::VersionConflict`] if `expected_version`
    ///   is stale
    /// - [`crate::error::Error::InvalidStateTransition`] if the run is
    ///   not `NOT_SCHEDULED`
    async fn schedule(
        &self,
        key: &RunKey,
        expected_version: u64,
        scheduled_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Marks a scheduled run as started and returns its new version.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`RunStore::schedule`]; the version check runs
    /// before the state check.
    async fn start(&self, key: &RunKey, expected_version: u64) -> Result<u64>;

    /// Terminates a scheduled or started run and returns its new version.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`RunStore::schedule`].
    async fn terminate(&self, key: &RunKey, expected_version: u64) -> Result<u64>;

    /// Marks a started run as completed and returns its new version.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`RunStore::schedule`].
    async fn complete(&self, key: &RunKey, expected_version: u64) -> Result<u64>;

    // --- Run Properties ---

    /// Gets one property of a run.
    ///
    /// Returns `None` if the run exists but has no property of that name.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::error::Error::RunNotFound`] if the run does
    /// not exist.
    async fn property(&self, key: &RunKey, name: &str) -> Result<Option<RunProperty>>;

    /// Lists all properties of a run, ordered by name.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::error::Error::RunNotFound`] if the run does
    /// not exist.
    async fn properties(&self, key: &RunKey) -> Result<Vec<RunProperty>>;

    /// Writes or clears a property override and returns the property's
    /// new version.
    ///
    /// Passing `None` clears the override so the default applies again.
    /// Overrides may only change while the run is `NOT_SCHEDULED`.
    ///
    /// # Errors
    ///
    /// - [`crate::error::Error::RunNotFound`] if the run does not exist
    /// - [`crate::error::Error::InvalidRunState`] if the run has left
    ///   `NOT_SCHEDULED`
    /// - [`crate::error::Error::PropertyNotFound`] if no property of
    ///   that name was declared
    /// - [`crate::error::Error::VersionConflict`] if `expected_version`
    ///   is stale
    async fn set_property(
        &self,
        key: &RunKey,
        name: &str,
        expected_version: u64,
        value: Option<String>,
    ) -> Result<u64>;
}
