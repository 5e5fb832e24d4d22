//! Recorded event outcomes.
//!
//! Every processed event leaves exactly one [`EventRecord`] behind,
//! success or failure. Records are the raw material for benchmark
//! analysis: failure counts, latency distributions, and per-event-name
//! charts all read from the [`ResultSink`].
//!
//! The dispatcher records the outcome of an event before it enqueues the
//! event's successors, so a reader never observes a successor without
//! its cause.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede_core::{DriverId, EventId};

use crate::error::{Error, Result};
use crate::run::RunKey;

/// The recorded outcome of one processed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// The event that was processed.
    pub event_id: EventId,
    /// The event's processor routing key.
    pub event_name: String,
    /// The run the event belonged to.
    pub run: RunKey,
    /// The dispatcher process that executed it.
    pub driver_id: DriverId,
    /// Whether processing succeeded.
    pub success: bool,
    /// Response data from the processor.
    #[serde(default)]
    pub data: Value,
    /// When processing began.
    pub started_at: DateTime<Utc>,
    /// How long processing took.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Whether processing overran the processor's warn delay.
    pub warned: bool,
    /// Whether the record should appear in result charts.
    pub chart: bool,
}

/// Receives event records as the dispatcher produces them.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from async
/// tasks.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores one record.
    async fn record(&self, record: EventRecord) -> Result<()>;

    /// Returns all records for a run, in recording order.
    async fn records_for_run(&self, run: &RunKey) -> Result<Vec<EventRecord>>;

    /// Returns a run's records for one event name, in recording order.
    async fn records_for_event_name(&self, run: &RunKey, name: &str) -> Result<Vec<EventRecord>>;

    /// Counts a run's failed records.
    async fn failure_count(&self, run: &RunKey) -> Result<usize>;
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("result sink lock poisoned")
}

/// In-memory result sink for testing.
///
/// Single-process only; all records are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    records: RwLock<Vec<EventRecord>>,
}

impl InMemoryResultSink {
    /// Creates a new, empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResultSink for InMemoryResultSink {
    async fn record(&self, record: EventRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poison_err)?;
        records.push(record);
        drop(records);

        Ok(())
    }

    async fn records_for_run(&self, run: &RunKey) -> Result<Vec<EventRecord>> {
        let records = self.records.read().map_err(poison_err)?;
        let matching = records.iter().filter(|r| &r.run == run).cloned().collect();
        drop(records);

        Ok(matching)
    }

    async fn records_for_event_name(&self, run: &RunKey, name: &str) -> Result<Vec<EventRecord>> {
        let records = self.records.read().map_err(poison_err)?;
        let matching = records
            .iter()
            .filter(|r| &r.run == run && r.event_name == name)
            .cloned()
            .collect();
        drop(records);

        Ok(matching)
    }

    async fn failure_count(&self, run: &RunKey) -> Result<usize> {
        let records = self.records.read().map_err(poison_err)?;
        let count = records.iter().filter(|r| &r.run == run && !r.success).count();
        drop(records);

        Ok(count)
    }
}
