//! # stampede-core
//!
//! Core abstractions for the Stampede distributed benchmark engine.
//!
//! This crate provides the foundational types used across all Stampede
//! components:
//!
//! - **Identifiers**: Strongly-typed ULID identifiers for events, sessions,
//!   and driver processes
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Crate Boundary
//!
//! `stampede-core` is the **only** crate allowed to define shared primitives.
//! The engine crate builds its domain types on top of these and never
//! redefines them.
//!
//! ## Example
//!
//! ```rust
//! use stampede_core::prelude::*;
//!
//! // Generate a unique event ID
//! let event_id = EventId::generate();
//!
//! // Each dispatcher process carries its own driver identity
//! let driver_id = DriverId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use stampede_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{DriverId, EventId, SessionId};
    pub use crate::observability::{init_logging, LogFormat};
}

// Re-export key types at crate root for ergonomics.
pub use error::{Error, Result};
pub use id::{DriverId, EventId, SessionId};
