//! nostr-sdk backed transport.
//!
//! Every relay lives in one shared [`Client`] pool. Relays added by
//! [`RelayTransport::connect`] stay until disconnected; relays added only to
//! fetch or publish are removed again by [`RelayTransport::close`] once no
//! one-shot operation is using them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use nostr_sdk::{Client, Event, Filter, Kind, PublicKey, RelayStatus};
use parking_lot::Mutex;

use super::RelayTransport;
use crate::error::TransportError;

#[derive(Default)]
struct Links {
    /// Opened through `connect`, kept until `disconnect`.
    persistent: HashSet<String>,
    /// One-shot operations in progress per relay.
    active: HashMap<String, usize>,
}

/// Marks a relay as busy for the duration of a fetch or publish.
struct OneShot {
    links: Arc<Mutex<Links>>,
    url: String,
}

impl Drop for OneShot {
    fn drop(&mut self) {
        let mut links = self.links.lock();
        let remaining = links.active.get_mut(&self.url).map(|n| {
            *n = n.saturating_sub(1);
            *n
        });
        if remaining == Some(0) {
            links.active.remove(&self.url);
        }
    }
}

/// [`RelayTransport`] over a shared nostr-sdk [`Client`] relay pool.
#[derive(Clone)]
pub struct NostrTransport {
    client: Client,
    links: Arc<Mutex<Links>>,
}

impl Default for NostrTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NostrTransport {
    /// Create a transport with its own unsigned client.
    pub fn new() -> Self {
        Self::with_client(Client::builder().build())
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            links: Arc::new(Mutex::new(Links::default())),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn one_shot(&self, url: &str) -> OneShot {
        *self
            .links
            .lock()
            .active
            .entry(url.to_string())
            .or_insert(0) += 1;
        OneShot {
            links: Arc::clone(&self.links),
            url: url.to_string(),
        }
    }

    /// Add the relay to the pool and connect it unless it already is.
    async fn ensure_connected(&self, url: &str, timeout: Duration) -> Result<(), TransportError> {
        self.client
            .add_relay(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if let Ok(relay) = self.client.relay(url).await
            && relay.status() == RelayStatus::Connected
        {
            return Ok(());
        }

        self.client
            .try_connect_relay(url, timeout)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}

impl RelayTransport for NostrTransport {
    fn connect<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.links.lock().persistent.insert(url.to_string());
            self.ensure_connected(url, timeout).await
        })
    }

    fn subscribe<'a>(
        &'a self,
        url: &'a str,
        filter: &'a Filter,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let output = self
                .client
                .subscribe_to([url], filter.clone(), None)
                .await
                .map_err(|e| TransportError::Protocol(e.to_string()))?;

            if output.success.is_empty() {
                let reason = output
                    .failed
                    .into_values()
                    .next()
                    .unwrap_or_else(|| "subscription not accepted".to_string());
                return Err(TransportError::Protocol(reason));
            }

            Ok(())
        })
    }

    fn disconnect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.links.lock().persistent.remove(url);
            self.client
                .disconnect_relay(url)
                .await
                .map_err(|e| TransportError::Protocol(e.to_string()))
        })
    }

    fn is_connected<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.client.relay(url).await {
                Ok(relay) => relay.status() == RelayStatus::Connected,
                Err(_) => false,
            }
        })
    }

    fn fetch_relay_list<'a>(
        &'a self,
        url: &'a str,
        author: &'a PublicKey,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Event>, TransportError>> {
        Box::pin(async move {
            let started = Instant::now();
            let _busy = self.one_shot(url);
            self.ensure_connected(url, timeout).await?;

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }

            let filter = Filter::new()
                .author(*author)
                .kind(Kind::RelayList)
                .limit(1);

            let events = self
                .client
                .fetch_events_from([url], filter, remaining)
                .await
                .map_err(|e| TransportError::Protocol(e.to_string()))?;

            match events.into_iter().max_by_key(|event| event.created_at) {
                Some(event) => Ok(Some(event)),
                // nostr-sdk returns what it has when the deadline passes, so an
                // empty result at the deadline means no answer, not "no record".
                None if started.elapsed() >= timeout => Err(TransportError::Timeout),
                None => Ok(None),
            }
        })
    }

    fn publish<'a>(
        &'a self,
        url: &'a str,
        event: &'a Event,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let _busy = self.one_shot(url);
            self.ensure_connected(url, timeout).await?;

            let output = self
                .client
                .send_event_to([url], event)
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;

            if output.success.is_empty() {
                let reason = output
                    .failed
                    .into_values()
                    .next()
                    .unwrap_or_else(|| "not acknowledged".to_string());
                return Err(TransportError::Publish(reason));
            }

            tracing::debug!("Published {} to {}", event.id, url);
            Ok(())
        })
    }

    fn close<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            {
                let links = self.links.lock();
                if links.persistent.contains(url) || links.active.contains_key(url) {
                    return;
                }
            }
            if let Err(e) = self.client.remove_relay(url).await {
                tracing::debug!("Removing one-shot relay {} failed: {}", url, e);
            }
        })
    }

    fn disconnect_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.links.lock().persistent.clear();
            self.client.disconnect().await;
        })
    }
}
