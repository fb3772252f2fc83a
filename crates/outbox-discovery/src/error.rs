//! Error types for relay tracking and discovery.

use thiserror::Error;

use crate::relay::EndpointStatus;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the orchestrator, discovery engine, and configuration.
///
/// Per-endpoint failures during a discovery session are recorded in that
/// endpoint's query state and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Record validation error.
    #[error(transparent)]
    Core(#[from] outbox_core::Error),

    /// Transport error outside a discovery session (connect, subscribe).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A status event is not valid for the endpoint's current state.
    #[error("invalid transition for {url}: {event} from {from}")]
    InvalidTransition {
        url: String,
        from: EndpointStatus,
        event: String,
    },

    /// Operation on an endpoint that is not tracked.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// URL failed normalization.
    #[error("{0}")]
    InvalidUrl(String),

    /// Discovery was started without any candidate endpoints.
    #[error("empty candidate list")]
    EmptyCandidates,

    /// Every candidate endpoint was rejected by normalization.
    #[error("none of the {0} candidate endpoints is a usable relay URL")]
    NoValidCandidates(usize),

    /// The identity key could not be parsed.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error (NIP-11 relay information).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single network operation against one endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connect or handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The endpoint answered with something unusable, or closed the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response within the attempt deadline.
    #[error("timed out")]
    Timeout,

    /// The endpoint rejected or never acknowledged a published event.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The operation was abandoned by a disconnect request.
    #[error("cancelled")]
    Cancelled,
}
