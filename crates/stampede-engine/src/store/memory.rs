//! In-memory run store implementation for testing.
//!
//! This module provides [`InMemoryRunStore`], a simple in-memory
//! implementation of the [`RunStore`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No cross-process coordination
//! - **Single-process only**: Run state is not shared across process boundaries
//! - **No persistence**: All runs are lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RunStore;
use crate::error::{Error, Result};
use crate::run::{RunKey, RunProperty, RunState, TestRun};

/// A stored run and its properties.
#[derive(Debug, Clone)]
struct RunRecord {
    run: TestRun,
    properties: HashMap<String, RunProperty>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("run store lock poisoned")
}

/// In-memory run store for testing.
///
/// Provides a simple, thread-safe implementation of the [`RunStore`]
/// trait using `RwLock` for synchronization.
///
/// ## Example
///
/// ```rust
/// use stampede_engine::store::memory::InMemoryRunStore;
///
/// let store = InMemoryRunStore::new();
/// // Use store in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: RwLock<HashMap<RunKey, RunRecord>>,
}

impl InMemoryRunStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one versioned state transition under the write lock.
    ///
    /// The version check runs before the transition check, and a rejected
    /// write leaves the record untouched.
    fn transition(
        &self,
        key: &RunKey,
        expected_version: u64,
        target: RunState,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut records = self.records.write().map_err(poison_err)?;

        let Some(record) = records.get_mut(key) else {
            drop(records);
            return Err(Error::RunNotFound { run: key.clone() });
        };

        if record.run.version != expected_version {
            let actual = record.run.version;
            drop(records);
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        // transition_to validates before mutating, so a rejected target
        // propagates without changing the run.
        record.run.transition_to(target)?;
        if let Some(at) = scheduled_at {
            record.run.scheduled_at = Some(at);
        }
        record.run.version = expected_version + 1;

        let version = record.run.version;
        drop(records);
        Ok(version)
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: TestRun, defaults: HashMap<String, String>) -> Result<()> {
        let mut records = self.records.write().map_err(poison_err)?;

        if records.contains_key(&run.key) {
            let key = run.key.clone();
            drop(records);
            return Err(Error::storage(format!("run {key} already exists")));
        }

        let properties = defaults
            .into_iter()
            .map(|(name, default_value)| (name.clone(), RunProperty::new(name, default_value)))
            .collect();

        records.insert(run.key.clone(), RunRecord { run, properties });
        drop(records);

        Ok(())
    }

    async fn get(&self, key: &RunKey) -> Result<Option<TestRun>> {
        let records = self.records.read().map_err(poison_err)?;
        let run = records.get(key).map(|record| record.run.clone());
        drop(records);

        Ok(run)
    }

    async fn list(&self, test: &str) -> Result<Vec<TestRun>> {
        let records = self.records.read().map_err(poison_err)?;
        let mut runs: Vec<TestRun> = records
            .values()
            .filter(|record| record.run.key.test == test)
            .map(|record| record.run.clone())
            .collect();
        drop(records);

        runs.sort_by(|a, b| a.key.run.cmp(&b.key.run));
        Ok(runs)
    }

    async fn runs_in_state(&self, state: RunState) -> Result<Vec<TestRun>> {
        let records = self.records.read().map_err(poison_err)?;
        let mut runs: Vec<TestRun> = records
            .values()
            .filter(|record| record.run.state == state)
            .map(|record| record.run.clone())
            .collect();
        drop(records);

        runs.sort_by(|a, b| (&a.key.test, &a.key.run).cmp(&(&b.key.test, &b.key.run)));
        Ok(runs)
    }

    async fn schedule(
        &self,
        key: &RunKey,
        expected_version: u64,
        scheduled_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.transition(key, expected_version, RunState::Scheduled, Some(scheduled_at))
    }

    async fn start(&self, key: &RunKey, expected_version: u64) -> Result<u64> {
        self.transition(key, expected_version, RunState::Started, None)
    }

    async fn terminate(&self, key: &RunKey, expected_version: u64) -> Result<u64> {
        self.transition(key, expected_version, RunState::Stopped, None)
    }

    async fn complete(&self, key: &RunKey, expected_version: u64) -> Result<u64> {
        self.transition(key, expected_version, RunState::Completed, None)
    }

    async fn property(&self, key: &RunKey, name: &str) -> Result<Option<RunProperty>> {
        let records = self.records.read().map_err(poison_err)?;

        let Some(record) = records.get(key) else {
            drop(records);
            return Err(Error::RunNotFound { run: key.clone() });
        };

        let property = record.properties.get(name).cloned();
        drop(records);

        Ok(property)
    }

    async fn properties(&self, key: &RunKey) -> Result<Vec<RunProperty>> {
        let records = self.records.read().map_err(poison_err)?;

        let Some(record) = records.get(key) else {
            drop(records);
            return Err(Error::RunNotFound { run: key.clone() });
        };

        let mut properties: Vec<RunProperty> = record.properties.values().cloned().collect();
        drop(records);

        properties.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(properties)
    }

    async fn set_property(
        &self,
        key: &RunKey,
        name: &str,
        expected_version: u64,
        value: Option<String>,
    ) -> Result<u64> {
        let mut records = self.records.write().map_err(poison_err)?;

        let Some(record) = records.get_mut(key) else {
            drop(records);
            return Err(Error::RunNotFound { run: key.clone() });
        };

        if record.run.state != RunState::NotScheduled {
            let state = record.run.state.to_string();
            drop(records);
            return Err(Error::InvalidRunState {
                state,
                reason: "properties are frozen once a run is scheduled".into(),
            });
        }

        let Some(property) = record.properties.get_mut(name) else {
            drop(records);
            return Err(Error::PropertyNotFound {
                run: key.clone(),
                name: name.to_string(),
            });
        };

        if property.version != expected_version {
            let actual = property.version;
            drop(records);
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        property.value = value;
        property.version = expected_version + 1;

        let version = property.version;
        drop(records);
        Ok(version)
    }
}
