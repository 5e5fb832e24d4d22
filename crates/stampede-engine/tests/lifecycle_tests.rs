//! Integration tests for stampede-engine dispatch and run orchestration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;

use stampede_engine::dispatcher::{Dispatcher, DispatcherConfig};
use stampede_engine::error::Result;
use stampede_engine::event::{Event, EventResult};
use stampede_engine::processor::{
    EventProcessor, FailingProcessor, NoopProcessor, ProcessorRegistry,
};
use stampede_engine::queue::EventQueue;
use stampede_engine::queue::memory::InMemoryEventQueue;
use stampede_engine::results::{InMemoryResultSink, ResultSink};
use stampede_engine::run::{RunKey, RunState, TestRun};
use stampede_engine::session::{InMemorySessionRegistry, SessionRegistry};
use stampede_engine::store::RunStore;
use stampede_engine::store::memory::InMemoryRunStore;

struct Engine {
    queue: Arc<InMemoryEventQueue>,
    store: Arc<InMemoryRunStore>,
    results: Arc<InMemoryResultSink>,
    sessions: Arc<InMemorySessionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

fn fast_config() -> DispatcherConfig {
    DispatcherConfig::default()
        .with_workers(2)
        .with_poll_interval(Duration::from_millis(5))
        .with_poll_backoff_max(Duration::from_millis(20))
        .with_run_poll_interval(Duration::from_millis(5))
        .with_completion_grace(Duration::ZERO)
}

fn engine(registry: ProcessorRegistry) -> Engine {
    engine_with_sessions(registry, Arc::new(InMemorySessionRegistry::new()))
}

fn engine_with_sessions(
    registry: ProcessorRegistry,
    sessions: Arc<InMemorySessionRegistry>,
) -> Engine {
    let queue = Arc::new(InMemoryEventQueue::new());
    let store = Arc::new(InMemoryRunStore::new());
    let results = Arc::new(InMemoryResultSink::new());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue) as Arc<dyn EventQueue>,
        Arc::clone(&store) as Arc<dyn RunStore>,
        Arc::clone(&results) as Arc<dyn ResultSink>,
        Arc::clone(&sessions) as Arc<dyn SessionRegistry>,
        Arc::new(registry),
        fast_config(),
    ));

    Engine {
        queue,
        store,
        results,
        sessions,
        dispatcher,
    }
}

/// Polls the store until the run reaches `state` or five seconds pass.
async fn wait_for_state(store: &InMemoryRunStore, key: &RunKey, state: RunState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let run = store.get(key).await.expect("store read");
            if run.is_some_and(|r| r.state == state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "run did not reach {state} within 5s");
}

/// Polls the queue until it is empty or five seconds pass.
async fn wait_for_drain(queue: &InMemoryEventQueue) {
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if queue.depth().await.expect("queue read") == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "queue did not drain within 5s");
}

/// Start processor: opens one session per simulated user and emits a
/// login event carrying it.
struct LoginSeeder {
    sessions: Arc<InMemorySessionRegistry>,
    users: usize,
}

#[async_trait]
impl EventProcessor for LoginSeeder {
    async fn process(&self, _event: &Event) -> Result<EventResult> {
        let mut next = Vec::with_capacity(self.users);
        for index in 0..self.users {
            let session = self
                .sessions
                .start_session(json!({ "user": format!("user-{index}") }))
                .await?;
            next.push(Event::new("user.login").with_session(session));
        }
        Ok(EventResult::success(json!({ "users": self.users }), next))
    }
}

/// Login step: hands off to a browse step on the same session.
struct Login;

#[async_trait]
impl EventProcessor for Login {
    async fn process(&self, _event: &Event) -> Result<EventResult> {
        Ok(EventResult::success(
            Value::Null,
            vec![Event::new("user.browse")],
        ))
    }
}

/// Final scenario step: ends every session it arrived with.
struct Browse {
    sessions: Arc<InMemorySessionRegistry>,
}

#[async_trait]
impl EventProcessor for Browse {
    async fn process(&self, event: &Event) -> Result<EventResult> {
        for session in &event.session_ids {
            self.sessions.end_session(session).await?;
        }
        Ok(EventResult::success(
            json!({ "sessions": event.session_ids.len() }),
            Vec::new(),
        ))
    }
}

/// Fans out a fixed number of successor events under one name.
struct FanOut {
    next: &'static str,
    count: usize,
}

#[async_trait]
impl EventProcessor for FanOut {
    async fn process(&self, _event: &Event) -> Result<EventResult> {
        let next = (0..self.count).map(|_| Event::new(self.next)).collect();
        Ok(EventResult::success(Value::Null, next))
    }
}

/// Test the full run lifecycle: schedule -> start -> fan out through a
/// login/browse scenario -> drain -> complete.
#[tokio::test]
async fn scheduled_run_executes_to_completion() {
    let sessions = Arc::new(InMemorySessionRegistry::new());
    let mut registry = ProcessorRegistry::new();
    registry.register(
        "start",
        Arc::new(LoginSeeder {
            sessions: Arc::clone(&sessions),
            users: 2,
        }),
    );
    registry.register("user.login", Arc::new(Login));
    registry.register(
        "user.browse",
        Arc::new(Browse {
            sessions: Arc::clone(&sessions),
        }),
    );
    let engine = engine_with_sessions(registry, sessions);

    // Create the run and schedule it for immediate start.
    let key = RunKey::new("share-bench", "run-01");
    engine
        .store
        .create(TestRun::new(key.clone()), HashMap::new())
        .await
        .unwrap();
    engine.store.schedule(&key, 0, Utc::now()).await.unwrap();

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&engine.dispatcher).run(rx));

    wait_for_state(&engine.store, &key, RunState::Completed).await;

    shutdown.send(true).ok();
    handle.await.unwrap();

    // One start, two logins, two browses.
    let records = engine.results.records_for_run(&key).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.success));

    let logins = engine
        .results
        .records_for_event_name(&key, "user.login")
        .await
        .unwrap();
    assert_eq!(logins.len(), 2);

    // Each browse inherited exactly its login's session and ended it.
    let browses = engine
        .results
        .records_for_event_name(&key, "user.browse")
        .await
        .unwrap();
    assert_eq!(browses.len(), 2);
    for record in &browses {
        assert_eq!(record.data["sessions"], json!(1));
    }
    assert_eq!(engine.sessions.active_count().await.unwrap(), 0);

    // The run carries its timing and the queue is spent.
    let run = engine.store.get(&key).await.unwrap().expect("run exists");
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert_eq!(engine.queue.depth().await.unwrap(), 0);
}

/// Test that failed events record failures and stop their chain while
/// the run still drains to completion.
#[tokio::test]
async fn failed_events_stop_their_chain() {
    let mut registry = ProcessorRegistry::new();
    registry.register(
        "start",
        Arc::new(FanOut {
            next: "flaky.op",
            count: 2,
        }),
    );
    registry.register("flaky.op", Arc::new(FailingProcessor));
    let engine = engine(registry);

    let key = RunKey::new("share-bench", "run-02");
    engine
        .store
        .create(TestRun::new(key.clone()), HashMap::new())
        .await
        .unwrap();
    engine.store.schedule(&key, 0, Utc::now()).await.unwrap();

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&engine.dispatcher).run(rx));

    wait_for_state(&engine.store, &key, RunState::Completed).await;

    shutdown.send(true).ok();
    handle.await.unwrap();

    // The start succeeded, both flaky operations failed, nothing fanned
    // out past them.
    let records = engine.results.records_for_run(&key).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(engine.results.failure_count(&key).await.unwrap(), 2);

    let failures = engine
        .results
        .records_for_event_name(&key, "flaky.op")
        .await
        .unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|r| !r.success));
}

/// Test that terminating a run discards its queued events without
/// recording them.
#[tokio::test]
async fn terminated_run_discards_queued_events() {
    let mut registry = ProcessorRegistry::new();
    registry.register("user.login", Arc::new(NoopProcessor));
    let engine = engine(registry);

    // Walk the run to STARTED by hand and queue work for it.
    let key = RunKey::new("share-bench", "run-03");
    engine
        .store
        .create(TestRun::new(key.clone()), HashMap::new())
        .await
        .unwrap();
    engine.store.schedule(&key, 0, Utc::now()).await.unwrap();
    engine.store.start(&key, 1).await.unwrap();
    for _ in 0..3 {
        engine
            .queue
            .enqueue(Event::new("user.login").with_run(key.clone()))
            .await
            .unwrap();
    }

    // Terminate before any worker touches the queue.
    let version = engine.dispatcher.terminate_run(&key, 2).await.unwrap();
    assert_eq!(version, 3);

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&engine.dispatcher).run(rx));

    wait_for_drain(&engine.queue).await;

    shutdown.send(true).ok();
    handle.await.unwrap();

    // The stranded events drained without producing records, and the
    // run stayed terminated.
    assert!(engine.results.records_for_run(&key).await.unwrap().is_empty());
    let run = engine.store.get(&key).await.unwrap().expect("run exists");
    assert_eq!(run.state, RunState::Stopped);
    assert!(run.completed_at.is_some());
}

/// Test that two drivers sharing a deployment start a run exactly once.
#[tokio::test]
async fn competing_drivers_start_a_run_exactly_once() {
    let queue = Arc::new(InMemoryEventQueue::new());
    let store = Arc::new(InMemoryRunStore::new());
    let results = Arc::new(InMemoryResultSink::new());
    let sessions = Arc::new(InMemorySessionRegistry::new());

    let mut drivers = Vec::new();
    for _ in 0..2 {
        let mut registry = ProcessorRegistry::new();
        registry.register("start", Arc::new(NoopProcessor));
        drivers.push(Arc::new(Dispatcher::new(
            Arc::clone(&queue) as Arc<dyn EventQueue>,
            Arc::clone(&store) as Arc<dyn RunStore>,
            Arc::clone(&results) as Arc<dyn ResultSink>,
            Arc::clone(&sessions) as Arc<dyn SessionRegistry>,
            Arc::new(registry),
            fast_config(),
        )));
    }

    let key = RunKey::new("share-bench", "run-04");
    store
        .create(TestRun::new(key.clone()), HashMap::new())
        .await
        .unwrap();
    store.schedule(&key, 0, Utc::now()).await.unwrap();

    let (shutdown, rx) = watch::channel(false);
    let handles: Vec<_> = drivers
        .iter()
        .map(|driver| tokio::spawn(Arc::clone(driver).run(rx.clone())))
        .collect();

    wait_for_state(&store, &key, RunState::Completed).await;

    shutdown.send(true).ok();
    for handle in handles {
        handle.await.unwrap();
    }

    // The CAS start picked one winner, so the start event ran once and
    // was claimed by exactly one driver.
    let records = results.records_for_run(&key).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    let winner = records[0].driver_id;
    assert!(drivers.iter().any(|driver| driver.driver_id() == winner));
}
