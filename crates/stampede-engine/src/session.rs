//! Session tracking.
//!
//! A session correlates a line of causally related events, typically one
//! simulated user's pass through a scenario. Scenario logic starts a
//! session on the first event of the line and ends it on the last;
//! session IDs travel on events in between (see
//! [`crate::processor::EventProcessor::propagate_sessions`]).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede_core::SessionId;

use crate::error::{Error, Result};

/// One tracked session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Opaque scenario data attached at start.
    #[serde(default)]
    pub data: Value,
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// When the session ended, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Returns true if the session has not ended.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Returns how long the session lasted, if it has ended.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at
            .map(|ended| ended.signed_duration_since(self.created_at))
    }
}

/// Tracks session start and end for a benchmark deployment.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from async
/// tasks.
#[async_trait::async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Starts a session and returns its ID.
    async fn start_session(&self, data: Value) -> Result<SessionId>;

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::error::Error::SessionNotFound`] if the session
    /// is unknown or already ended.
    async fn end_session(&self, session_id: &SessionId) -> Result<()>;

    /// Looks up a session by ID.
    async fn session(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// Counts sessions that have started but not ended.
    async fn active_count(&self) -> Result<usize>;
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("session registry lock poisoned")
}

/// In-memory session registry for testing.
///
/// Single-process only; all sessions are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn start_session(&self, data: Value) -> Result<SessionId> {
        let session = Session {
            id: SessionId::generate(),
            data,
            created_at: Utc::now(),
            ended_at: None,
        };
        let id = session.id;

        let mut sessions = self.sessions.write().map_err(poison_err)?;
        sessions.insert(id, session);
        drop(sessions);

        Ok(id)
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poison_err)?;

        let Some(session) = sessions.get_mut(session_id) else {
            drop(sessions);
            return Err(Error::SessionNotFound {
                session_id: *session_id,
            });
        };

        // Ending twice is the same fault as ending an unknown session.
        if session.ended_at.is_some() {
            drop(sessions);
            return Err(Error::SessionNotFound {
                session_id: *session_id,
            });
        }

        session.ended_at = Some(Utc::now());
        drop(sessions);

        Ok(())
    }

    async fn session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        let sessions = self.sessions.read().map_err(poison_err)?;
        let session = sessions.get(session_id).cloned();
        drop(sessions);

        Ok(session)
    }

    async fn active_count(&self) -> Result<usize> {
        let sessions = self.sessions.read().map_err(poison_err)?;
        let count = sessions.values().filter(|s| s.is_active()).count();
        drop(sessions);

        Ok(count)
    }
}
