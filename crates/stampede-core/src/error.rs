//! Error types and result aliases for Stampede.

/// Result alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the shared foundation crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the identifier invalid.
        message: String,
    },
}
