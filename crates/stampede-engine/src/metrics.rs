//! Observability metrics for dispatch and orchestration.
//!
//! This module provides Prometheus-compatible metrics for monitoring
//! a benchmark deployment. Metrics are designed to support:
//!
//! - **Alerting**: Lease expirations and failure rates signal overload
//! - **Dashboards**: Real-time visibility into queue depth and throughput
//! - **Debugging**: Correlating metrics with traces for root cause analysis
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `stampede_events_processed_total` | Counter | `event`, `status` | Processed events by name and outcome |
//! | `stampede_event_process_seconds` | Histogram | `event` | Event processing duration |
//! | `stampede_events_discarded_total` | Counter | - | Events dropped because their run was not started |
//! | `stampede_lease_expirations_total` | Counter | - | Completions rejected because the lease lapsed |
//! | `stampede_queue_depth` | Gauge | - | Events currently queued |
//! | `stampede_sessions_active` | Gauge | - | Sessions started but not ended |
//! | `stampede_runs_started_total` | Counter | `run` | Runs moved to STARTED |
//! | `stampede_runs_completed_total` | Counter | `run` | Runs moved to COMPLETED |
//! | `stampede_runs_terminated_total` | Counter | `run` | Runs moved to STOPPED |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use stampede_engine::metrics::EngineMetrics;
//!
//! let metrics = EngineMetrics::new();
//!
//! // Record a processed event
//! metrics.record_event_processed("share.login", true, Duration::from_millis(45));
//!
//! // Update the queue depth gauge
//! metrics.set_queue_depth(12);
//! ```
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade. To export to Prometheus:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::run::RunKey;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Processed events by name and outcome.
    pub const EVENTS_PROCESSED_TOTAL: &str = "stampede_events_processed_total";
    /// Histogram: Event processing duration in seconds.
    pub const EVENT_PROCESS_SECONDS: &str = "stampede_event_process_seconds";
    /// Counter: Events dropped because their run was not started.
    pub const EVENTS_DISCARDED_TOTAL: &str = "stampede_events_discarded_total";
    /// Counter: Completions rejected because the lease lapsed.
    pub const LEASE_EXPIRATIONS_TOTAL: &str = "stampede_lease_expirations_total";
    /// Gauge: Events currently queued.
    pub const QUEUE_DEPTH: &str = "stampede_queue_depth";
    /// Gauge: Sessions started but not ended.
    pub const SESSIONS_ACTIVE: &str = "stampede_sessions_active";
    /// Counter: Runs moved to STARTED.
    pub const RUNS_STARTED_TOTAL: &str = "stampede_runs_started_total";
    /// Counter: Runs moved to COMPLETED.
    pub const RUNS_COMPLETED_TOTAL: &str = "stampede_runs_completed_total";
    /// Counter: Runs moved to STOPPED.
    pub const RUNS_TERMINATED_TOTAL: &str = "stampede_runs_terminated_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Event name.
    pub const EVENT: &str = "event";
    /// Processing outcome (success, failure).
    pub const STATUS: &str = "status";
    /// Run key in `{test}.{run}` form.
    pub const RUN: &str = "run";
}

/// High-level interface for recording engine metrics.
///
/// This struct provides ergonomic methods for recording metrics with
/// proper labeling. It's designed to be cheap to copy and share across
/// tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one processed event.
    ///
    /// Increments `stampede_events_processed_total` and records the
    /// duration in `stampede_event_process_seconds`.
    pub fn record_event_processed(&self, event: &str, success: bool, elapsed: Duration) {
        let status = if success { "success" } else { "failure" };
        counter!(
            names::EVENTS_PROCESSED_TOTAL,
            labels::EVENT => event.to_string(),
            labels::STATUS => status,
        )
        .increment(1);
        histogram!(
            names::EVENT_PROCESS_SECONDS,
            labels::EVENT => event.to_string(),
        )
        .record(elapsed.as_secs_f64());
    }

    /// Records an event discarded because its run was not started.
    ///
    /// Increments the `stampede_events_discarded_total` counter.
    pub fn record_event_discarded(&self) {
        counter!(names::EVENTS_DISCARDED_TOTAL).increment(1);
    }

    /// Records a completion rejected because the lease lapsed.
    ///
    /// Increments the `stampede_lease_expirations_total` counter.
    pub fn record_lease_expired(&self) {
        counter!(names::LEASE_EXPIRATIONS_TOTAL).increment(1);
    }

    /// Sets the queued-event gauge.
    ///
    /// Updates the `stampede_queue_depth` gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_queue_depth(&self, depth: usize) {
        gauge!(names::QUEUE_DEPTH).set(depth as f64);
    }

    /// Sets the active-session gauge.
    ///
    /// Updates the `stampede_sessions_active` gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_active_sessions(&self, count: usize) {
        gauge!(names::SESSIONS_ACTIVE).set(count as f64);
    }

    /// Records a run moving to `STARTED`.
    ///
    /// Increments the `stampede_runs_started_total` counter.
    pub fn record_run_started(&self, run: &RunKey) {
        counter!(
            names::RUNS_STARTED_TOTAL,
            labels::RUN => run.to_string(),
        )
        .increment(1);
    }

    /// Records a run moving to `COMPLETED`.
    ///
    /// Increments the `stampede_runs_completed_total` counter.
    pub fn record_run_completed(&self, run: &RunKey) {
        counter!(
            names::RUNS_COMPLETED_TOTAL,
            labels::RUN => run.to_string(),
        )
        .increment(1);
    }

    /// Records a run moving to `STOPPED`.
    ///
    /// Increments the `stampede_runs_terminated_total` counter.
    pub fn record_run_terminated(&self, run: &RunKey) {
        counter!(
            names::RUNS_TERMINATED_TOTAL,
            labels::RUN => run.to_string(),
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_can_record_events() {
        let metrics = EngineMetrics::new();

        // These calls should not panic even without a metrics recorder installed
        metrics.record_event_processed("share.login", true, Duration::from_millis(45));
        metrics.record_event_processed("share.login", false, Duration::from_secs(2));
        metrics.record_event_discarded();
        metrics.record_lease_expired();
    }

    #[test]
    fn engine_metrics_can_set_gauges() {
        let metrics = EngineMetrics::new();

        metrics.set_queue_depth(12);
        metrics.set_active_sessions(3);
    }

    #[test]
    fn engine_metrics_can_record_run_transitions() {
        let metrics = EngineMetrics::new();
        let run = RunKey::new("load-soak", "run-01");

        metrics.record_run_started(&run);
        metrics.record_run_completed(&run);
        metrics.record_run_terminated(&run);
    }
}
