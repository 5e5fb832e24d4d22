//! Events and processing results.
//!
//! An [`Event`] is the unit of scheduled work: a named record with a due
//! time and an opaque payload. Processing an event yields an
//! [`EventResult`] carrying the outcome and any successor events to
//! enqueue next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede_core::{DriverId, EventId, SessionId};

use crate::run::RunKey;

/// A unit of scheduled scenario work.
///
/// Events are claimable once their due time has passed. The queue assigns
/// a monotonic sequence on enqueue; among due events the lowest sequence
/// is always claimed first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier, generated at construction.
    pub id: EventId,
    /// Processor routing key.
    pub name: String,
    /// Opaque scenario data carried between processors.
    #[serde(default)]
    pub payload: Value,
    /// Earliest instant the event may be claimed.
    pub due_at: DateTime<Utc>,
    /// Queue-assigned dispatch order, set on enqueue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Sessions this event participates in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_ids: Vec<SessionId>,
    /// Dispatcher process that produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,
    /// Run the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunKey>,
}

impl Event {
    /// Creates an event due immediately with an empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EventId::generate(),
            name: name.into(),
            payload: Value::Null,
            due_at: Utc::now(),
            sequence: None,
            session_ids: Vec::new(),
            driver_id: None,
            run: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the due time.
    #[must_use]
    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = due_at;
        self
    }

    /// Adds a session the event participates in.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_ids.push(session_id);
        self
    }

    /// Assigns the event to a run.
    #[must_use]
    pub fn with_run(mut self, run: RunKey) -> Self {
        self.run = Some(run);
        self
    }

    /// Stamps the producing driver.
    #[must_use]
    pub fn with_driver(mut self, driver_id: DriverId) -> Self {
        self.driver_id = Some(driver_id);
        self
    }
}

/// The outcome of processing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResult {
    /// Whether processing succeeded.
    pub success: bool,
    /// Response data recorded alongside the outcome.
    #[serde(default)]
    pub data: Value,
    /// Successor events to enqueue. Always empty on failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_events: Vec<Event>,
}

impl EventResult {
    /// Creates a successful result with successor events.
    #[must_use]
    pub fn success(data: Value, next_events: Vec<Event>) -> Self {
        Self {
            success: true,
            data,
            next_events,
        }
    }

    /// Creates a failed result. Failures never produce successors.
    #[must_use]
    pub fn failure(data: Value) -> Self {
        Self {
            success: false,
            data,
            next_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_due_immediately() {
        let before = Utc::now();
        let event = Event::new("share.login");
        assert_eq!(event.name, "share.login");
        assert_eq!(event.payload, Value::Null);
        assert!(event.sequence.is_none());
        assert!(event.session_ids.is_empty());
        assert!(event.due_at >= before);
        assert!(event.due_at <= Utc::now());
    }

    #[test]
    fn builders_populate_fields() {
        let session = SessionId::generate();
        let driver = DriverId::generate();
        let due = Utc::now() + chrono::Duration::seconds(30);
        let event = Event::new("share.search")
            .with_payload(serde_json::json!({"term": "invoices"}))
            .with_due_at(due)
            .with_session(session)
            .with_run(RunKey::new("load-soak", "run-01"))
            .with_driver(driver);

        assert_eq!(event.due_at, due);
        assert_eq!(event.session_ids, vec![session]);
        assert_eq!(event.driver_id, Some(driver));
        assert_eq!(event.run, Some(RunKey::new("load-soak", "run-01")));
        assert_eq!(event.payload["term"], "invoices");
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = Event::new("share.login").with_session(SessionId::generate());
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("dueAt").is_some());
        assert!(json.get("sessionIds").is_some());
        // Unset optionals are omitted entirely.
        assert!(json.get("sequence").is_none());
        assert!(json.get("driverId").is_none());
        assert!(json.get("run").is_none());
    }

    #[test]
    fn event_deserializes_without_payload() {
        let json = format!(
            r#"{{"id":"{}","name":"share.login","dueAt":"2026-01-05T10:00:00Z"}}"#,
            EventId::generate()
        );
        let event: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.payload, Value::Null);
        assert!(event.session_ids.is_empty());
    }

    #[test]
    fn failure_result_has_no_successors() {
        let result = EventResult::failure(serde_json::json!({"error": "timeout"}));
        assert!(!result.success);
        assert!(result.next_events.is_empty());
    }

    #[test]
    fn success_result_carries_successors() {
        let result = EventResult::success(Value::Null, vec![Event::new("share.logout")]);
        assert!(result.success);
        assert_eq!(result.next_events.len(), 1);
    }
}
