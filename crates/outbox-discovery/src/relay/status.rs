//! Per-endpoint connection state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──handshake──▶ Connected ──subscribe──▶ Subscribed
//!                               ▲   │                     │                        │
//!                          retry│   └──────failure────────┴────────failure─────────┤
//!                               │                                                  ▼
//!                               └───────────────────────────────────────── ConnectFailed
//!
//! Any state ──disconnect──▶ Disconnected
//! ```

use std::fmt;

use serde::Serialize;

/// Connection status of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EndpointStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    /// Transport error, handshake failure, or idle timeout.
    ConnectFailed(Option<String>),
}

impl EndpointStatus {
    /// True while the transport link is up.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::ConnectFailed(_) => "connect_failed",
        }
    }

    /// Apply an event, returning the next status, or `None` if the event is
    /// not valid in this status.
    ///
    /// `Disconnect` is valid everywhere; applying it to `Disconnected` yields
    /// `Disconnected` again.
    pub fn transition(&self, event: &StatusEvent) -> Option<EndpointStatus> {
        use EndpointStatus::*;

        match (self, event) {
            (_, StatusEvent::Disconnect) => Some(Disconnected),
            (Disconnected, StatusEvent::Connect) => Some(Connecting),
            (Connecting, StatusEvent::HandshakeOk) => Some(Connected),
            (Connected, StatusEvent::SubscriptionAccepted) => Some(Subscribed),
            (Connecting | Connected | Subscribed, StatusEvent::Failure(reason)) => {
                let reason = (!reason.is_empty()).then(|| reason.clone());
                Some(ConnectFailed(reason))
            }
            (ConnectFailed(_), StatusEvent::Retry) => Some(Connecting),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(Some(reason)) => write!(f, "connect-failed ({})", reason),
            Self::ConnectFailed(None) => write!(f, "connect-failed"),
            other => f.write_str(other.label()),
        }
    }
}

/// Inputs that drive [`EndpointStatus`] transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// `connect()` was requested.
    Connect,
    /// The transport handshake succeeded.
    HandshakeOk,
    /// The endpoint accepted the first outbound subscription.
    SubscriptionAccepted,
    /// Transport error, handshake failure, or idle timeout.
    Failure(String),
    /// Explicit retry out of `ConnectFailed`.
    Retry,
    /// Explicit teardown.
    Disconnect,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::HandshakeOk => "handshake-ok",
            Self::SubscriptionAccepted => "subscription-accepted",
            Self::Failure(_) => "failure",
            Self::Retry => "retry",
            Self::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}
