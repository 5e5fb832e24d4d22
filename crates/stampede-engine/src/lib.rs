//! # stampede-engine
//!
//! Event dispatch and run orchestration for the Stampede benchmark engine.
//!
//! This crate implements the benchmark execution domain, providing:
//!
//! - **Event Dispatch**: Claim-based delivery with time-bounded leases and
//!   at-least-once redelivery
//! - **Run Orchestration**: CAS-guarded run lifecycle from scheduling
//!   through completion
//! - **Result Capture**: Per-event outcome records with timing for later
//!   analysis
//! - **Session Tracking**: Scenario session bookkeeping across event chains
//!
//! ## Core Concepts
//!
//! - **Event**: A named unit of benchmark work, queued until a worker
//!   claims it
//! - **Run**: One execution of a named test, walked through a small state
//!   machine by whichever driver wins each transition
//! - **Processor**: Application logic bound to an event name, returning a
//!   result and any successor events
//! - **Driver**: One dispatcher process; any number share a deployment
//!
//! ## Guarantees
//!
//! - **At-least-once**: A claimed event survives a worker crash and is
//!   re-delivered once its lease lapses
//! - **Single winner**: Version checks give every run transition exactly
//!   one winner across drivers
//! - **Ordered capture**: An event's record is written before its
//!   successors become claimable
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use stampede_engine::dispatcher::{Dispatcher, DispatcherConfig};
//! use stampede_engine::error::Result;
//! use stampede_engine::processor::{NoopProcessor, ProcessorRegistry};
//! use stampede_engine::queue::memory::InMemoryEventQueue;
//! use stampede_engine::results::InMemoryResultSink;
//! use stampede_engine::run::{RunKey, TestRun};
//! use stampede_engine::session::InMemorySessionRegistry;
//! use stampede_engine::store::memory::InMemoryRunStore;
//! use stampede_engine::store::RunStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! // Bind a processor to the run's start event.
//! let mut registry = ProcessorRegistry::new();
//! registry.register("start", Arc::new(NoopProcessor));
//!
//! let store = Arc::new(InMemoryRunStore::new());
//! let dispatcher = Arc::new(Dispatcher::new(
//!     Arc::new(InMemoryEventQueue::new()),
//!     Arc::clone(&store) as Arc<dyn RunStore>,
//!     Arc::new(InMemoryResultSink::new()),
//!     Arc::new(InMemorySessionRegistry::new()),
//!     Arc::new(registry),
//!     DispatcherConfig::default(),
//! ));
//!
//! // Create and schedule a run; the dispatcher starts it once due.
//! let key = RunKey::new("load-soak", "run-01");
//! store.create(TestRun::new(key.clone()), HashMap::new()).await?;
//! store.schedule(&key, 0, chrono::Utc::now()).await?;
//!
//! let (shutdown, rx) = tokio::sync::watch::channel(false);
//! let engine = tokio::spawn(Arc::clone(&dispatcher).run(rx));
//!
//! // ... wait for the run to drain ...
//!
//! shutdown.send(true).ok();
//! # engine.await.ok();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod results;
pub mod run;
pub mod session;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig};
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventResult};
    pub use crate::listener::RunListener;
    pub use crate::metrics::EngineMetrics;
    pub use crate::processor::{
        EventProcessor, FailingProcessor, NoopProcessor, ProcessorRegistry,
    };
    pub use crate::queue::memory::InMemoryEventQueue;
    pub use crate::queue::{ClaimedEvent, EventQueue, Lease};
    pub use crate::results::{EventRecord, InMemoryResultSink, ResultSink};
    pub use crate::run::{RunKey, RunProperty, RunState, TestRun};
    pub use crate::session::{InMemorySessionRegistry, Session, SessionRegistry};
    pub use crate::store::memory::InMemoryRunStore;
    pub use crate::store::RunStore;
}
