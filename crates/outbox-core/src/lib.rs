//! Core types, validation, and shared utilities for outbox relay-list discovery.
//!
//! This crate provides:
//! - Relay URL normalization and blocklist filtering
//! - The NIP-65 relay-list record model ([`VersionedRecord`]) with ID and
//!   signature verification via the nostr crate
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod record;
pub mod metrics;
pub mod url;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Nostr genesis date: November 7, 2020.
/// Relay-list records with `created_at` before this date are bogus.
pub const NOSTR_GENESIS_TIMESTAMP: u64 = 1604707200; // 2020-11-07 00:00:00 UTC

/// Event kind of a NIP-65 relay-list record.
pub const RELAY_LIST_KIND: u16 = 10002;

pub use error::{Error, Result};
pub use record::{RelayUsage, VersionedRecord, parse_relay_tags};
pub use url::{
    NormalizeOptions, NormalizeResult, normalize_relay_url, normalize_relay_url_with_opts,
};
