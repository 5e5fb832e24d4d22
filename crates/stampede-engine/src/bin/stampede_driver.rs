//! Stampede dispatch driver service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use stampede_core::observability::{LogFormat, init_logging};
use stampede_engine::dispatcher::{Dispatcher, DispatcherConfig};
use stampede_engine::error::{Error, Result};
use stampede_engine::processor::{NoopProcessor, ProcessorRegistry};
use stampede_engine::queue::memory::InMemoryEventQueue;
use stampede_engine::results::InMemoryResultSink;
use stampede_engine::run::{DEFAULT_START_EVENT_NAME, RunKey, TestRun};
use stampede_engine::session::InMemorySessionRegistry;
use stampede_engine::store::RunStore;
use stampede_engine::store::memory::InMemoryRunStore;

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::configuration(format!("missing {key}")))
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key).map_or(default, |value| value.eq_ignore_ascii_case("true"))
}

fn log_format_from_env() -> LogFormat {
    match std::env::var("STAMPEDE_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(log_format_from_env());

    let config = DispatcherConfig::from_env()?;

    let queue = Arc::new(InMemoryEventQueue::new());
    let store = Arc::new(InMemoryRunStore::new());
    let results = Arc::new(InMemoryResultSink::new());
    let sessions = Arc::new(InMemorySessionRegistry::new());

    let mut registry = ProcessorRegistry::new();
    registry.register(DEFAULT_START_EVENT_NAME, Arc::new(NoopProcessor));
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(Dispatcher::new(
        queue,
        Arc::clone(&store) as Arc<dyn RunStore>,
        results,
        sessions,
        Arc::clone(&registry),
        config.clone(),
    ));

    tracing::info!(
        driver = %dispatcher.driver_id(),
        workers = config.workers,
        processors = ?registry.names(),
        "stampede driver starting"
    );

    // Seeding a run gives the driver something to execute without an
    // operator in the loop; useful for smoke checks.
    if parse_bool_env("STAMPEDE_SEED_RUN", false) {
        let test = required_env("STAMPEDE_TEST_NAME")?;
        let run = required_env("STAMPEDE_RUN_NAME")?;
        let key = RunKey::new(test, run);
        store
            .create(TestRun::new(key.clone()), HashMap::new())
            .await?;
        store.schedule(&key, 0, Utc::now()).await?;
        tracing::info!(run = %key, "seeded run for immediate start");
    }

    let (shutdown, rx) = watch::channel(false);
    let engine = tokio::spawn(Arc::clone(&dispatcher).run(rx));

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down");
    shutdown.send(true).ok();
    if let Err(err) = engine.await {
        tracing::error!(error = %err, "dispatcher did not shut down cleanly");
    }

    Ok(())
}
