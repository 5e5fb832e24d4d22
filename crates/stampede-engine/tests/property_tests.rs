//! Property-based tests for stampede-engine invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use tokio_test::block_on;

use stampede_core::EventId;
use stampede_engine::error::Error;
use stampede_engine::event::Event;
use stampede_engine::queue::EventQueue;
use stampede_engine::queue::memory::InMemoryEventQueue;
use stampede_engine::run::{RunKey, RunState, TestRun};
use stampede_engine::store::RunStore;
use stampede_engine::store::memory::InMemoryRunStore;

/// Generates a random run state.
fn arb_run_state() -> impl Strategy<Value = RunState> {
    prop::sample::select(vec![
        RunState::NotScheduled,
        RunState::Scheduled,
        RunState::Started,
        RunState::Stopped,
        RunState::Completed,
    ])
}

/// Generates a random EventId (diverse, not constant per run).
fn arb_event_id() -> impl Strategy<Value = EventId> {
    any::<u64>().prop_map(|_| EventId::generate())
}

proptest! {
    /// INVARIANT: Run state transitions follow the lifecycle machine.
    ///
    /// State machine (from stampede-engine/src/run.rs):
    /// - NotScheduled -> Scheduled
    /// - Scheduled -> Started, Stopped
    /// - Started -> Stopped, Completed
    /// - Stopped, Completed -> (terminal)
    #[test]
    fn run_state_transitions_valid(initial in arb_run_state()) {
        match initial {
            RunState::NotScheduled => {
                prop_assert!(initial.can_transition_to(RunState::Scheduled));
                prop_assert!(!initial.can_transition_to(RunState::Started));
                prop_assert!(!initial.can_transition_to(RunState::Stopped));
                prop_assert!(!initial.can_transition_to(RunState::Completed));
            }
            RunState::Scheduled => {
                prop_assert!(initial.can_transition_to(RunState::Started));
                prop_assert!(initial.can_transition_to(RunState::Stopped));
                prop_assert!(!initial.can_transition_to(RunState::Completed));
                prop_assert!(!initial.can_transition_to(RunState::NotScheduled));
            }
            RunState::Started => {
                prop_assert!(initial.can_transition_to(RunState::Stopped));
                prop_assert!(initial.can_transition_to(RunState::Completed));
                prop_assert!(!initial.can_transition_to(RunState::Scheduled));
            }
            RunState::Stopped | RunState::Completed => {
                prop_assert!(initial.is_terminal());
            }
        }
    }

    /// INVARIANT: Terminal states allow no further transitions.
    #[test]
    fn terminal_states_are_absorbing(
        terminal in prop::sample::select(vec![RunState::Stopped, RunState::Completed]),
        target in arb_run_state(),
    ) {
        prop_assert!(terminal.is_terminal());
        prop_assert!(!terminal.can_transition_to(target));
    }

    /// INVARIANT: No state transitions to itself.
    #[test]
    fn no_state_transitions_to_itself(state in arb_run_state()) {
        prop_assert!(!state.can_transition_to(state));
    }

    /// INVARIANT: EventId survives a string round trip.
    #[test]
    fn event_id_string_round_trip(id in arb_event_id()) {
        let text = id.to_string();
        prop_assert_eq!(text.len(), 26);

        let parsed: EventId = text.parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    /// INVARIANT: Strings shorter than a ULID never parse as ids.
    #[test]
    fn malformed_ids_are_rejected(raw in "[a-z!@# ]{1,10}") {
        prop_assert!(raw.parse::<EventId>().is_err());
    }

    /// INVARIANT: A run key displays as test.run.
    #[test]
    fn run_key_display_is_test_dot_run(
        test in "[a-z][a-z0-9-]{2,12}",
        run in "[a-z][a-z0-9-]{2,12}",
    ) {
        let key = RunKey::new(test.clone(), run.clone());
        prop_assert_eq!(key.to_string(), format!("{test}.{run}"));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// INVARIANT: A stale CAS write is rejected and changes nothing.
    #[test]
    fn stale_schedule_never_mutates(stale in 1u64..50) {
        let (err, run) = block_on(async {
            let store = InMemoryRunStore::new();
            let key = RunKey::new("prop-test", "run-01");
            store
                .create(TestRun::new(key.clone()), HashMap::new())
                .await
                .unwrap();

            // The actual version is 0; anything else must lose.
            let err = store.schedule(&key, stale, Utc::now()).await.unwrap_err();
            let run = store.get(&key).await.unwrap().expect("run exists");
            (err, run)
        });

        // Bound to a local because prop_assert! stringifies its condition
        // into a format string, where the pattern's braces are invalid.
        let is_expected_conflict = matches!(
            err,
            Error::VersionConflict { expected, actual } if expected == stale && actual == 0
        );
        prop_assert!(is_expected_conflict);
        prop_assert_eq!(run.state, RunState::NotScheduled);
        prop_assert_eq!(run.version, 0);
        prop_assert!(run.scheduled_at.is_none());
    }

    /// INVARIANT: Losing writers never advance the version.
    #[test]
    fn stale_writers_never_advance_the_version(stale_attempts in 1usize..5) {
        let (version, state) = block_on(async move {
            let store = InMemoryRunStore::new();
            let key = RunKey::new("prop-test", "run-02");
            store
                .create(TestRun::new(key.clone()), HashMap::new())
                .await
                .unwrap();

            let v1 = store.schedule(&key, 0, Utc::now()).await.unwrap();
            // Stale echoes of the old version all lose.
            for _ in 0..stale_attempts {
                store.schedule(&key, 0, Utc::now()).await.unwrap_err();
                store.start(&key, 0).await.unwrap_err();
            }
            let v2 = store.start(&key, v1).await.unwrap();
            for _ in 0..stale_attempts {
                store.complete(&key, v1).await.unwrap_err();
            }
            store.complete(&key, v2).await.unwrap();

            let run = store.get(&key).await.unwrap().expect("run exists");
            (run.version, run.state)
        });

        prop_assert_eq!(version, 3);
        prop_assert_eq!(state, RunState::Completed);
    }

    /// INVARIANT: Workers never claim the same event twice while its
    /// lease is live.
    #[test]
    fn claims_are_exclusive(events in 1usize..12, workers in 2usize..5) {
        let (claimed_ids, depth) = block_on(async move {
            let queue = InMemoryEventQueue::new();
            let run = RunKey::new("prop-test", "run-03");
            for _ in 0..events {
                queue
                    .enqueue(Event::new("op").with_run(run.clone()))
                    .await
                    .unwrap();
            }

            let mut ids = Vec::new();
            'drain: loop {
                for worker in 0..workers {
                    let claim = queue
                        .claim_next(&format!("w{worker}"), Duration::from_secs(60))
                        .await
                        .unwrap();
                    match claim {
                        Some(claimed) => ids.push(claimed.event.id),
                        None => break 'drain,
                    }
                }
            }

            (ids, queue.depth().await.unwrap())
        });

        prop_assert_eq!(claimed_ids.len(), events);
        let unique: HashSet<_> = claimed_ids.iter().collect();
        prop_assert_eq!(unique.len(), events);
        // Claims leave events in place until completed.
        prop_assert_eq!(depth, events);
    }

    /// INVARIANT: Claims surface events in enqueue order.
    #[test]
    fn claims_follow_enqueue_order(events in 1usize..10) {
        let names = block_on(async move {
            let queue = InMemoryEventQueue::new();
            let run = RunKey::new("prop-test", "run-04");
            for index in 0..events {
                queue
                    .enqueue(Event::new(format!("op.{index}")).with_run(run.clone()))
                    .await
                    .unwrap();
            }

            let mut names = Vec::new();
            while let Some(claimed) = queue
                .claim_next("w0", Duration::from_secs(60))
                .await
                .unwrap()
            {
                names.push(claimed.event.name);
            }
            names
        });

        let expected: Vec<String> = (0..events).map(|index| format!("op.{index}")).collect();
        prop_assert_eq!(names, expected);
    }
}
