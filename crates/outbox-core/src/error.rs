//! Error types for relay-list records.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating a relay-list record.
#[derive(Error, Debug)]
pub enum Error {
    /// The event ID is not the hash of the event's contents.
    #[error("invalid event ID: {0}")]
    InvalidEventId(String),

    /// The signature does not verify against the author's key.
    #[error("invalid event signature: {0}")]
    InvalidSignature(String),

    /// The event is not a relay-list record.
    #[error("unexpected event kind: expected {expected}, found {found}")]
    UnexpectedKind {
        /// The kind we asked for.
        expected: u16,
        /// The kind the endpoint returned.
        found: u16,
    },

    /// The event was authored by someone other than the queried identity.
    #[error("author mismatch: expected {expected}, found {found}")]
    AuthorMismatch {
        /// Hex public key of the queried identity.
        expected: String,
        /// Hex public key found on the event.
        found: String,
    },

    /// A field holds a value no genuine record can have.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nostr library error (event parsing).
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr::event::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::InvalidEventId("abc123".to_string()).to_string(),
            "invalid event ID: abc123"
        );
        assert_eq!(
            Error::UnexpectedKind {
                expected: 10002,
                found: 1,
            }
            .to_string(),
            "unexpected event kind: expected 10002, found 1"
        );
        assert_eq!(
            Error::InvalidField {
                field: "created_at",
                reason: "predates genesis".to_string(),
            }
            .to_string(),
            "invalid field 'created_at': predates genesis"
        );
    }

    #[test]
    fn test_author_mismatch_names_both_keys() {
        let msg = Error::AuthorMismatch {
            expected: "aa".repeat(32),
            found: "bb".repeat(32),
        }
        .to_string();
        assert!(msg.starts_with("author mismatch"));
        assert!(msg.contains(&"aa".repeat(32)) && msg.contains(&"bb".repeat(32)));
    }

    #[test]
    fn test_json_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Json(_)));
    }
}
