//! Outbox relay-list discovery.
//!
//! This crate finds an identity's NIP-65 relay list by asking many relays at
//! once, reconciles the copies they return, and republishes the newest copy
//! to relays that serve an older one.
//!
//! # Modules
//!
//! - [`relay`] - Endpoint status tracking and connection orchestration
//! - [`transport`] - The relay transport trait and its nostr-sdk implementation
//! - [`discovery`] - Scatter-gather sessions, reconciliation, and republishing
//! - [`config`] - Environment configuration and candidate lists
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ DiscoveryEngine  │  Batched queries per identity, session ceiling
//! └────────┬─────────┘
//!          │ SessionReport
//!          ▼
//! ┌──────────────────┐
//! │    reconcile     │  Group by version, pick latest, diff, outliers
//! └────────┬─────────┘
//!          │ latest record + outdated sources
//!          ▼
//! ┌──────────────────┐
//! │   Republisher    │  Send the signed payload to stale relays
//! └──────────────────┘
//!
//! All three talk to relays through RelayTransport; the Orchestrator owns the
//! transport, tracks endpoint status, and provides the cancellation epoch.
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod relay;
pub mod transport;

pub use error::{Error, Result, TransportError};

pub use discovery::{
    DiscoveryConfig, DiscoveryEngine, OutlierPolicy, Progress, QueryState, QueryStatus,
    Reconciliation, ReconciliationGroup, Republisher, SessionHandle, SessionReport,
};
pub use relay::{
    EndpointFlags, EndpointStatus, Orchestrator, OrchestratorConfig, StatusChange, StatusEvent,
    StatusFeed,
};
pub use transport::{NostrTransport, RelayTransport};
