//! Relay transport abstraction.
//!
//! The orchestrator and discovery engine talk to relays only through
//! [`RelayTransport`], so tests can script relay behavior without a network.
//! The production implementation is [`NostrTransport`], backed by nostr-sdk.
//!
//! Methods return boxed futures so the trait stays object safe and can be
//! shared as `Arc<dyn RelayTransport>`.

mod nostr;
#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::{Event, Filter, PublicKey};

use crate::error::TransportError;

pub use self::nostr::NostrTransport;

/// Network operations against a single relay, addressed by normalized URL.
pub trait RelayTransport: Send + Sync {
    /// Open the connection and wait for the handshake, up to `timeout`.
    fn connect<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Open a subscription. Resolves once the relay accepted the request.
    fn subscribe<'a>(
        &'a self,
        url: &'a str,
        filter: &'a Filter,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Tear down the connection and every subscription on it.
    fn disconnect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Whether the underlying link is currently up.
    fn is_connected<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool>;

    /// Fetch `author`'s newest relay-list event.
    ///
    /// `Ok(None)` means the relay answered and has no record.
    fn fetch_relay_list<'a>(
        &'a self,
        url: &'a str,
        author: &'a PublicKey,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Event>, TransportError>>;

    /// Publish an already-signed event. Resolves once the relay acknowledged it.
    fn publish<'a>(
        &'a self,
        url: &'a str,
        event: &'a Event,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Release a link that was opened only for [`fetch_relay_list`] or
    /// [`publish`]. Links opened by [`connect`] and links still in use are
    /// kept.
    ///
    /// [`fetch_relay_list`]: Self::fetch_relay_list
    /// [`publish`]: Self::publish
    /// [`connect`]: Self::connect
    fn close<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()>;

    /// Tear down every link, tracked or not.
    fn disconnect_all(&self) -> BoxFuture<'_, ()>;
}
