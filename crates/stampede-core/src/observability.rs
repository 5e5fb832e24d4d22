//! Observability infrastructure for Stampede.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors shared by all
//! Stampede components.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `stampede_engine=debug`)
///
/// # Example
///
/// ```rust
/// use stampede_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for event dispatch work with standard fields.
///
/// # Example
///
/// ```rust
/// use stampede_core::observability::dispatch_span;
///
/// let span = dispatch_span("driver-w0", "01J9ZC9WJ0000000000000000");
/// let _guard = span.enter();
/// // ... claim and process an event
/// ```
#[must_use]
pub fn dispatch_span(worker: &str, driver: &str) -> Span {
    tracing::info_span!("dispatch", worker = worker, driver = driver)
}

/// Creates a span for run lifecycle polling.
///
/// # Example
///
/// ```rust
/// use stampede_core::observability::run_poll_span;
///
/// let span = run_poll_span("01J9ZC9WJ0000000000000000");
/// let _guard = span.enter();
/// // ... poll run states
/// ```
#[must_use]
pub fn run_poll_span(driver: &str) -> Span {
    tracing::info_span!("run_poll", driver = driver)
}
