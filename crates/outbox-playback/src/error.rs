//! Error types for the playback pool.

use thiserror::Error;

/// Result type alias using the pool's error type.
pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The factory could not create a handle for the key.
    #[error("failed to create playback handle for {key}: {reason}")]
    Create { key: String, reason: String },
}
