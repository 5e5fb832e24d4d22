//! Benchmark run tracking.
//!
//! A run is one execution of a named test. Its lifecycle is a strict
//! state machine:
//!
//! ```text
//! NOT_SCHEDULED --> SCHEDULED --> STARTED --> COMPLETED
//!                       |            |
//!                       +------------+--> STOPPED
//! ```
//!
//! `STOPPED` and `COMPLETED` are terminal. Every mutation of a stored run
//! is a compare-and-set on its `version`; see [`crate::store::RunStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Event name a run seeds its first event with unless overridden.
pub const DEFAULT_START_EVENT_NAME: &str = "start";

/// Identifies a run as a test name plus a run name.
///
/// Run names are unique within a test. The pair renders as
/// `{test}.{run}` in logs and errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunKey {
    /// The test the run belongs to.
    pub test: String,
    /// The run name, unique within the test.
    pub run: String,
}

impl RunKey {
    /// Creates a run key.
    #[must_use]
    pub fn new(test: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            run: run.into(),
        }
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.test, self.run)
    }
}

/// Run state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Created, not yet scheduled.
    NotScheduled,
    /// Scheduled to start at a given time.
    Scheduled,
    /// Actively executing events.
    Started,
    /// Terminated before finishing.
    Stopped,
    /// Drained and finished.
    Completed,
}

impl RunState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::NotScheduled => matches!(target, Self::Scheduled),
            Self::Scheduled => matches!(target, Self::Started | Self::Stopped),
            Self::Started => matches!(target, Self::Stopped | Self::Completed),
            Self::Stopped | Self::Completed => false,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::NotScheduled
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotScheduled => write!(f, "NOT_SCHEDULED"),
            Self::Scheduled => write!(f, "SCHEDULED"),
            Self::Started => write!(f, "STARTED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// A single execution of a benchmark test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    /// Test and run name.
    pub key: RunKey,
    /// Optimistic concurrency version, incremented on every stored write.
    pub version: u64,
    /// Current state of the run.
    pub state: RunState,
    /// Name of the event seeded when the run starts.
    pub start_event_name: String,
    /// When the run record was created.
    pub created_at: DateTime<Utc>,
    /// When the run is due to start (if scheduled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the run started executing (if started).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state (if it has).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TestRun {
    /// Creates a new run in `NOT_SCHEDULED` at version 0.
    #[must_use]
    pub fn new(key: RunKey) -> Self {
        Self {
            key,
            version: 0,
            state: RunState::NotScheduled,
            start_event_name: DEFAULT_START_EVENT_NAME.to_string(),
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Overrides the name of the seeded start event.
    #[must_use]
    pub fn with_start_event(mut self, name: impl Into<String>) -> Self {
        self.start_event_name = name.into();
        self
    }

    /// Returns true if the run is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns how long the run executed, if it started and finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed.signed_duration_since(started)),
            _ => None,
        }
    }

    /// Transitions to a new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(skip(self), fields(run = %self.key, from = %self.state, to = %target))]
    pub fn transition_to(&mut self, target: RunState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "invalid run state transition".into(),
            });
        }

        let now = Utc::now();

        match target {
            RunState::Started => {
                self.started_at = Some(now);
            }
            RunState::Stopped | RunState::Completed => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        self.state = target;
        Ok(())
    }
}

/// A named, defaulted property attached to a run.
///
/// Properties start at their default value. Overrides carry their own
/// version and may only be written while the run is `NOT_SCHEDULED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProperty {
    /// Property name, unique within the run.
    pub name: String,
    /// Value used when no override is set.
    pub default_value: String,
    /// Override value, if one has been written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Optimistic concurrency version for this property.
    pub version: u64,
}

impl RunProperty {
    /// Creates a property at its default value, version 0.
    #[must_use]
    pub fn new(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: default_value.into(),
            value: None,
            version: 0,
        }
    }

    /// Returns the override if set, otherwise the default.
    #[must_use]
    pub fn effective(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.default_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_key_displays_dotted() {
        let key = RunKey::new("load-soak", "run-01");
        assert_eq!(key.to_string(), "load-soak.run-01");
    }

    #[test]
    fn run_state_transitions() {
        let state = RunState::NotScheduled;
        assert!(state.can_transition_to(RunState::Scheduled));
        assert!(!state.can_transition_to(RunState::Started));
        assert!(!state.can_transition_to(RunState::Completed));
    }

    #[test]
    fn scheduled_run_can_be_stopped_without_starting() {
        assert!(RunState::Scheduled.can_transition_to(RunState::Stopped));
        assert!(!RunState::Scheduled.can_transition_to(RunState::Completed));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for terminal in [RunState::Stopped, RunState::Completed] {
            assert!(terminal.is_terminal());
            for target in [
                RunState::NotScheduled,
                RunState::Scheduled,
                RunState::Started,
                RunState::Stopped,
                RunState::Completed,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn new_run_starts_unscheduled() {
        let run = TestRun::new(RunKey::new("load-soak", "run-01"));
        assert_eq!(run.state, RunState::NotScheduled);
        assert_eq!(run.version, 0);
        assert_eq!(run.start_event_name, DEFAULT_START_EVENT_NAME);
        assert!(run.scheduled_at.is_none());
    }

    #[test]
    fn transition_stamps_timestamps() -> Result<()> {
        let mut run = TestRun::new(RunKey::new("load-soak", "run-01"));
        run.transition_to(RunState::Scheduled)?;
        assert!(run.started_at.is_none());

        run.transition_to(RunState::Started)?;
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_none());

        run.transition_to(RunState::Completed)?;
        assert!(run.completed_at.is_some());
        assert!(run.duration().is_some());
        Ok(())
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut run = TestRun::new(RunKey::new("load-soak", "run-01"));
        let err = run.transition_to(RunState::Completed).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        // The record is untouched by the rejected transition.
        assert_eq!(run.state, RunState::NotScheduled);
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn state_serializes_screaming_snake() {
        let json = serde_json::to_string(&RunState::NotScheduled).unwrap();
        assert_eq!(json, "\"NOT_SCHEDULED\"");
        assert_eq!(RunState::NotScheduled.to_string(), "NOT_SCHEDULED");
    }

    #[test]
    fn property_effective_prefers_override() {
        let mut prop = RunProperty::new("share.users", "100");
        assert_eq!(prop.effective(), "100");

        prop.value = Some("500".into());
        assert_eq!(prop.effective(), "500");

        prop.value = None;
        assert_eq!(prop.effective(), "100");
    }
}
