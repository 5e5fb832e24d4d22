//! Error types for the dispatch and orchestration domain.

use stampede_core::{EventId, SessionId};

use crate::run::RunKey;

/// The result type used throughout stampede-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dispatch and orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A run was not found.
    #[error("run not found: {run}")]
    RunNotFound {
        /// The run key that was not found.
        run: RunKey,
    },

    /// A run property was not found.
    #[error("property not found: {name} on run {run}")]
    PropertyNotFound {
        /// The run the lookup targeted.
        run: RunKey,
        /// The property name that was not found.
        name: String,
    },

    /// A session was not found or is already ended.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The session ID that was not found.
        session_id: SessionId,
    },

    /// A versioned write lost to a concurrent writer.
    #[error("version conflict: expected {expected}, actual {actual}")]
    VersionConflict {
        /// The version the writer observed before the write.
        expected: u64,
        /// The version the record actually holds.
        actual: u64,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// An operation is not allowed in the run's current state.
    #[error("run is {state}: {reason}")]
    InvalidRunState {
        /// The run's current state.
        state: String,
        /// The reason the operation is rejected.
        reason: String,
    },

    /// A claim lease lapsed before the holder finished with the event.
    #[error("lease expired: event {event_id} is no longer held by {worker}")]
    LeaseExpired {
        /// The event whose lease lapsed.
        event_id: EventId,
        /// The worker that held the lapsed lease.
        worker: String,
    },

    /// Event processing failed.
    #[error("event processing failed: {message}")]
    Processing {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A configuration value was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An error from stampede-core.
    #[error("core error: {0}")]
    Core(#[from] stampede_core::error::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new processing error.
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new processing error with a source.
    #[must_use]
    pub fn processing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
