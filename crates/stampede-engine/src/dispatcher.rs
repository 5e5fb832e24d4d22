//! The dispatcher: claim workers and run lifecycle polling.
//!
//! One [`Dispatcher`] per process. It runs two kinds of loops:
//!
//! - **Claim workers** pull due events off the shared queue, resolve the
//!   processor for the event name, record the outcome, and enqueue any
//!   successor events. Workers back off exponentially while the queue is
//!   idle and snap back to the base interval on the first claim.
//! - **The run poller** starts scheduled runs whose start time has
//!   passed, completes started runs that have drained, and refreshes the
//!   queue and session gauges.
//!
//! Any number of dispatcher processes may share one deployment. The CAS
//! run store picks a single winner for every lifecycle transition, and
//! the queue's leases keep two workers off the same event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;

use stampede_core::DriverId;
use stampede_core::observability::{dispatch_span, run_poll_span};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::listener::RunListener;
use crate::metrics::EngineMetrics;
use crate::processor::ProcessorRegistry;
use crate::queue::{ClaimedEvent, EventQueue};
use crate::results::{EventRecord, ResultSink};
use crate::run::{RunKey, RunState};
use crate::session::SessionRegistry;
use crate::store::RunStore;

/// Environment variable naming the number of claim workers.
pub const ENV_WORKERS: &str = "STAMPEDE_WORKERS";
/// Environment variable naming the claim lease duration.
pub const ENV_LEASE_DURATION: &str = "STAMPEDE_LEASE_DURATION";
/// Environment variable naming the idle claim poll interval.
pub const ENV_POLL_INTERVAL: &str = "STAMPEDE_POLL_INTERVAL";
/// Environment variable naming the cap on the idle claim backoff.
pub const ENV_POLL_BACKOFF_MAX: &str = "STAMPEDE_POLL_BACKOFF_MAX";
/// Environment variable naming the run lifecycle poll interval.
pub const ENV_RUN_POLL_INTERVAL: &str = "STAMPEDE_RUN_POLL_INTERVAL";
/// Environment variable naming the run completion grace period.
pub const ENV_COMPLETION_GRACE: &str = "STAMPEDE_COMPLETION_GRACE";

const fn default_workers() -> usize {
    4
}

const fn default_lease_duration() -> Duration {
    Duration::from_secs(120)
}

const fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

const fn default_poll_backoff_max() -> Duration {
    Duration::from_millis(5000)
}

const fn default_run_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

const fn default_completion_grace() -> Duration {
    Duration::from_secs(5)
}

/// Tuning for one dispatcher process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Number of concurrent claim workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long a claim lease lasts before the event is re-deliverable.
    #[serde(default = "default_lease_duration", with = "humantime_serde")]
    pub lease_duration: Duration,
    /// Shortest pause between claim attempts while the queue is idle.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Cap on the exponential idle claim backoff.
    #[serde(default = "default_poll_backoff_max", with = "humantime_serde")]
    pub poll_backoff_max: Duration,
    /// Pause between run lifecycle polls.
    #[serde(default = "default_run_poll_interval", with = "humantime_serde")]
    pub run_poll_interval: Duration,
    /// How long a started run must sit with an empty queue before it
    /// counts as drained.
    #[serde(default = "default_completion_grace", with = "humantime_serde")]
    pub completion_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            lease_duration: default_lease_duration(),
            poll_interval: default_poll_interval(),
            poll_backoff_max: default_poll_backoff_max(),
            run_poll_interval: default_run_poll_interval(),
            completion_grace: default_completion_grace(),
        }
    }
}

impl DispatcherConfig {
    /// Sets the number of claim workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the claim lease duration.
    #[must_use]
    pub const fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Sets the idle claim poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the cap on the idle claim backoff.
    #[must_use]
    pub const fn with_poll_backoff_max(mut self, poll_backoff_max: Duration) -> Self {
        self.poll_backoff_max = poll_backoff_max;
        self
    }

    /// Sets the run lifecycle poll interval.
    #[must_use]
    pub const fn with_run_poll_interval(mut self, run_poll_interval: Duration) -> Self {
        self.run_poll_interval = run_poll_interval;
        self
    }

    /// Sets the run completion grace period.
    #[must_use]
    pub const fn with_completion_grace(mut self, completion_grace: Duration) -> Self {
        self.completion_grace = completion_grace;
        self
    }

    /// Reads configuration from `STAMPEDE_*` environment variables.
    ///
    /// Unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when a set key does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when a set key does not parse.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            let workers = raw.parse::<usize>().ok().filter(|&w| w > 0).ok_or_else(|| {
                Error::configuration(format!(
                    "{ENV_WORKERS} must be a positive integer, got '{raw}'"
                ))
            })?;
            config.workers = workers;
        }

        config.lease_duration =
            parse_duration_env(&lookup, ENV_LEASE_DURATION, config.lease_duration)?;
        config.poll_interval =
            parse_duration_env(&lookup, ENV_POLL_INTERVAL, config.poll_interval)?;
        config.poll_backoff_max =
            parse_duration_env(&lookup, ENV_POLL_BACKOFF_MAX, config.poll_backoff_max)?;
        config.run_poll_interval =
            parse_duration_env(&lookup, ENV_RUN_POLL_INTERVAL, config.run_poll_interval)?;
        config.completion_grace =
            parse_duration_env(&lookup, ENV_COMPLETION_GRACE, config.completion_grace)?;

        Ok(config)
    }
}

/// Parses one duration key through `lookup`, keeping `default` when unset.
fn parse_duration_env<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => humantime::parse_duration(&raw)
            .map_err(|e| Error::configuration(format!("{key} is not a valid duration: {e}"))),
        None => Ok(default),
    }
}

/// Exponential idle backoff with a deterministic cap.
fn idle_backoff(base: Duration, cap: Duration, idle_polls: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
    let exponent = idle_polls.saturating_sub(1);
    let millis = base_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(cap_ms);
    Duration::from_millis(millis)
}

/// Waits `delay` or until shutdown is signalled, whichever comes first.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

/// One dispatcher process.
///
/// Holds the queue, store, result sink, and session registry shared by a
/// deployment, plus this process's processor registry and identity.
pub struct Dispatcher {
    queue: Arc<dyn EventQueue>,
    store: Arc<dyn RunStore>,
    results: Arc<dyn ResultSink>,
    sessions: Arc<dyn SessionRegistry>,
    registry: Arc<ProcessorRegistry>,
    listeners: Vec<Arc<dyn RunListener>>,
    metrics: EngineMetrics,
    driver_id: DriverId,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Creates a dispatcher with a freshly generated driver ID.
    #[must_use]
    pub fn new(
        queue: Arc<dyn EventQueue>,
        store: Arc<dyn RunStore>,
        results: Arc<dyn ResultSink>,
        sessions: Arc<dyn SessionRegistry>,
        registry: Arc<ProcessorRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            store,
            results,
            sessions,
            registry,
            listeners: Vec::new(),
            metrics: EngineMetrics::new(),
            driver_id: DriverId::generate(),
            config,
        }
    }

    /// Adds a run lifecycle listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The identifier this process stamps on events it produces.
    #[must_use]
    pub const fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    /// Runs claim workers and the run poller until `shutdown` turns true.
    ///
    /// An event being processed when shutdown arrives finishes normally;
    /// only the loops stop.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        let driver = self.driver_id.to_string();

        for index in 0..self.config.workers {
            let dispatcher = Arc::clone(&self);
            let worker = format!("{driver}-w{index}");
            let span = dispatch_span(&worker, &driver);
            let rx = shutdown.clone();
            handles.push(tokio::spawn(
                async move { dispatcher.worker_loop(&worker, rx).await }.instrument(span),
            ));
        }

        let poller = Arc::clone(&self);
        let span = run_poll_span(&driver);
        let rx = shutdown.clone();
        handles.push(tokio::spawn(
            async move { poller.run_poll_loop(rx).await }.instrument(span),
        ));

        for joined in futures::future::join_all(handles).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "dispatcher task panicked");
            }
        }
    }

    /// Claims and processes events until shutdown.
    async fn worker_loop(&self, worker: &str, mut shutdown: watch::Receiver<bool>) {
        let mut idle_polls: u32 = 0;

        while !*shutdown.borrow() {
            match self.dispatch_next(worker).await {
                Ok(true) => {
                    idle_polls = 0;
                }
                Ok(false) => {
                    idle_polls = idle_polls.saturating_add(1);
                    let delay = idle_backoff(
                        self.config.poll_interval,
                        self.config.poll_backoff_max,
                        idle_polls,
                    );
                    pause(delay, &mut shutdown).await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "dispatch attempt failed");
                    pause(self.config.poll_interval, &mut shutdown).await;
                }
            }
        }

        tracing::debug!("worker stopped");
    }

    /// Claims one event and processes it.
    ///
    /// Returns `Ok(true)` when an event was claimed, `Ok(false)` when the
    /// queue had nothing due.
    async fn dispatch_next(&self, worker: &str) -> Result<bool> {
        let Some(claimed) = self
            .queue
            .claim_next(worker, self.config.lease_duration)
            .await?
        else {
            return Ok(false);
        };

        self.process_claimed(worker, claimed).await?;
        Ok(true)
    }

    /// Runs one claimed event through its processor.
    ///
    /// The record is written before successors become claimable, so a
    /// reader never observes a successor without its cause. If recording
    /// or enqueueing fails the claim is left to lapse and the event is
    /// re-delivered.
    #[tracing::instrument(
        skip(self, claimed),
        fields(event_id = %claimed.event.id, event = %claimed.event.name)
    )]
    async fn process_claimed(&self, worker: &str, claimed: ClaimedEvent) -> Result<()> {
        let event = &claimed.event;

        let Some(run_key) = event.run.clone() else {
            tracing::warn!("event has no run assignment; discarding");
            self.metrics.record_event_discarded();
            self.complete_claimed(worker, &claimed).await;
            return Ok(());
        };

        // Terminating a run strands its queued events; they drain here
        // instead of being processed.
        let run_started = matches!(
            self.store.get(&run_key).await?,
            Some(run) if run.state == RunState::Started
        );
        if !run_started {
            tracing::debug!(run = %run_key, "run is not started; discarding event");
            self.metrics.record_event_discarded();
            self.complete_claimed(worker, &claimed).await;
            return Ok(());
        }

        let Some(processor) = self.registry.resolve(&event.name) else {
            // An unregistered event name is a recorded failure, not a
            // dispatcher error; the run's results stay complete.
            let message = format!("no processor registered for event '{}'", event.name);
            tracing::error!(run = %run_key, "{message}");

            self.results
                .record(EventRecord {
                    event_id: event.id,
                    event_name: event.name.clone(),
                    run: run_key,
                    driver_id: self.driver_id,
                    success: false,
                    data: serde_json::json!({ "error": message }),
                    started_at: Utc::now(),
                    elapsed: Duration::ZERO,
                    warned: false,
                    chart: true,
                })
                .await?;
            self.metrics
                .record_event_processed(&event.name, false, Duration::ZERO);
            self.complete_claimed(worker, &claimed).await;
            return Ok(());
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        let outcome = processor.process(event).await;
        let elapsed = timer.elapsed();

        let warn_delay = processor.warn_delay();
        let warned = elapsed > warn_delay;
        if warned {
            tracing::warn!(?elapsed, ?warn_delay, "event processing overran its warn delay");
        }

        let (success, data, next_events) = match outcome {
            Ok(result) => (result.success, result.data, result.next_events),
            Err(error) => (
                false,
                serde_json::json!({ "error": error.to_string() }),
                Vec::new(),
            ),
        };

        self.results
            .record(EventRecord {
                event_id: event.id,
                event_name: event.name.clone(),
                run: run_key.clone(),
                driver_id: self.driver_id,
                success,
                data,
                started_at,
                elapsed,
                warned,
                chart: processor.include_in_charts(),
            })
            .await?;
        self.metrics
            .record_event_processed(&event.name, success, elapsed);

        for mut next in next_events {
            processor.propagate_sessions(event, &mut next);
            next.run = Some(run_key.clone());
            next.driver_id = Some(self.driver_id);
            self.queue.enqueue(next).await?;
        }

        self.complete_claimed(worker, &claimed).await;
        Ok(())
    }

    /// Completes a claimed event, absorbing a lapsed lease.
    async fn complete_claimed(&self, worker: &str, claimed: &ClaimedEvent) {
        match self
            .queue
            .complete(&claimed.event.id, worker, &claimed.lease.token)
            .await
        {
            Ok(()) => {}
            Err(Error::LeaseExpired { .. }) => {
                // Another worker holds the claim now; drop this completion.
                self.metrics.record_lease_expired();
                tracing::warn!(
                    event_id = %claimed.event.id,
                    "lease lapsed before completion; event will be re-delivered"
                );
            }
            Err(err) => {
                tracing::error!(event_id = %claimed.event.id, error = %err, "failed to complete event");
            }
        }
    }

    /// Polls run lifecycle until shutdown.
    async fn run_poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if let Err(err) = self.poll_runs_once().await {
                tracing::error!(error = %err, "run poll failed");
            }
            pause(self.config.run_poll_interval, &mut shutdown).await;
        }

        tracing::debug!("run poller stopped");
    }

    /// One pass over run lifecycle duties.
    async fn poll_runs_once(&self) -> Result<()> {
        self.start_due_runs().await?;
        self.complete_drained_runs().await?;

        self.metrics.set_queue_depth(self.queue.depth().await?);
        self.metrics
            .set_active_sessions(self.sessions.active_count().await?);

        Ok(())
    }

    /// Starts scheduled runs whose start time has passed.
    ///
    /// Every dispatcher process races here; the CAS start picks one
    /// winner, and only the winner seeds the run's first event.
    async fn start_due_runs(&self) -> Result<()> {
        let now = Utc::now();

        for run in self.store.runs_in_state(RunState::Scheduled).await? {
            if !run.scheduled_at.is_some_and(|at| at <= now) {
                continue;
            }

            match self.store.start(&run.key, run.version).await {
                Ok(_version) => {
                    let seed = Event::new(run.start_event_name.clone())
                        .with_run(run.key.clone())
                        .with_driver(self.driver_id);
                    self.queue.enqueue(seed).await?;

                    self.metrics.record_run_started(&run.key);
                    tracing::info!(run = %run.key, event = %run.start_event_name, "run started");

                    if let Some(started) = self.store.get(&run.key).await? {
                        for listener in &self.listeners {
                            listener.run_started(&started).await;
                        }
                    }
                }
                Err(
                    Error::VersionConflict { .. }
                    | Error::InvalidStateTransition { .. }
                    | Error::RunNotFound { .. },
                ) => {
                    tracing::debug!(run = %run.key, "run already started elsewhere");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Completes started runs whose queues have drained.
    ///
    /// The grace period keeps a fresh run alive through the gap between
    /// its start being stored and its seed event landing in the queue.
    async fn complete_drained_runs(&self) -> Result<()> {
        let now = Utc::now();

        for run in self.store.runs_in_state(RunState::Started).await? {
            let age = run
                .started_at
                .and_then(|at| now.signed_duration_since(at).to_std().ok());
            if !age.is_some_and(|age| age >= self.config.completion_grace) {
                continue;
            }

            if self.queue.count_pending(&run.key).await? > 0 {
                continue;
            }

            match self.store.complete(&run.key, run.version).await {
                Ok(_version) => {
                    self.metrics.record_run_completed(&run.key);
                    tracing::info!(run = %run.key, "run completed");

                    if let Some(completed) = self.store.get(&run.key).await? {
                        for listener in &self.listeners {
                            listener.run_completed(&completed).await;
                        }
                    }
                }
                Err(
                    Error::VersionConflict { .. }
                    | Error::InvalidStateTransition { .. }
                    | Error::RunNotFound { .. },
                ) => {
                    tracing::debug!(run = %run.key, "run no longer completable");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Terminates a run.
    ///
    /// Queued events of the run stay queued; workers discard them on
    /// claim because the run is no longer `STARTED`.
    ///
    /// # Errors
    ///
    /// Propagates the store's CAS taxonomy, including
    /// [`Error::VersionConflict`] when `expected_version` is stale.
    #[tracing::instrument(skip(self), fields(run = %key, driver = %self.driver_id))]
    pub async fn terminate_run(&self, key: &RunKey, expected_version: u64) -> Result<u64> {
        let version = self.store.terminate(key, expected_version).await?;
        self.metrics.record_run_terminated(key);
        tracing::info!("run terminated");

        if let Some(terminated) = self.store.get(key).await? {
            for listener in &self.listeners {
                listener.run_terminated(&terminated).await;
            }
        }

        Ok(version)
    }
}
