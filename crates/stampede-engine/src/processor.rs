//! Event processors and their registry.
//!
//! An [`EventProcessor`] is the extension seam for scenario logic: it
//! takes one event and returns an [`EventResult`] with the outcome and
//! any successor events. The dispatcher resolves processors by event
//! name through a [`ProcessorRegistry`].
//!
//! Processors must tolerate re-delivery: an event whose claim lease
//! lapsed mid-flight will be processed again by another worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::event::{Event, EventResult};

/// Time budget before a slow processor draws a warning, unless the
/// processor overrides [`EventProcessor::warn_delay`].
pub const DEFAULT_WARN_DELAY: Duration = Duration::from_secs(5);

/// Scenario logic for one kind of event.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Processes one event.
    ///
    /// Returning `Ok` with a failed [`EventResult`] records a scenario
    /// failure; returning `Err` records a processing failure. Either way
    /// the event is consumed and exactly one record is written.
    async fn process(&self, event: &Event) -> Result<EventResult>;

    /// How long processing may take before the dispatcher logs a warning
    /// and flags the record.
    fn warn_delay(&self) -> Duration {
        DEFAULT_WARN_DELAY
    }

    /// Whether records of this processor belong in result charts.
    ///
    /// Setup and teardown processors typically return `false` so they do
    /// not skew scenario latency charts.
    fn include_in_charts(&self) -> bool {
        true
    }

    /// Carries session membership from an event to one of its successors.
    ///
    /// The default keeps a successor's own sessions if the processor set
    /// any, and copies the parent's otherwise.
    fn propagate_sessions(&self, event: &Event, next: &mut Event) {
        if next.session_ids.is_empty() {
            next.session_ids = event.session_ids.clone();
        }
    }
}

/// Maps event names to the processors that handle them.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn EventProcessor>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor for an event name, replacing any previous
    /// registration for that name.
    pub fn register(&mut self, name: impl Into<String>, processor: Arc<dyn EventProcessor>) {
        self.processors.insert(name.into(), processor);
    }

    /// Resolves the processor for an event name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn EventProcessor>> {
        self.processors.get(name).cloned()
    }

    /// Returns the registered event names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Processor that succeeds immediately with no successors.
///
/// Useful as a terminal step in a scenario chain and as a stand-in in
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessor;

#[async_trait]
impl EventProcessor for NoopProcessor {
    async fn process(&self, _event: &Event) -> Result<EventResult> {
        Ok(EventResult::success(Value::Null, Vec::new()))
    }
}

/// Processor that fails every event it sees.
///
/// Useful for exercising failure recording and chain-stop behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingProcessor;

#[async_trait]
impl EventProcessor for FailingProcessor {
    async fn process(&self, event: &Event) -> Result<EventResult> {
        Ok(EventResult::failure(serde_json::json!({
            "error": format!("forced failure for {}", event.name),
        })))
    }
}
