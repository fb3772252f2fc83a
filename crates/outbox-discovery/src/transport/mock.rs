//! Scripted in-memory transport for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::{Event, EventBuilder, Filter, Keys, Kind, PublicKey, Tag, Timestamp};
use parking_lot::Mutex;

use super::RelayTransport;
use crate::error::TransportError;

/// How a relay answers `connect`.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    Accept,
    AcceptAfter(Duration),
    Refuse(String),
    Hang,
}

/// How a relay answers a relay-list fetch.
#[derive(Debug, Clone)]
pub enum FetchScript {
    Record(Box<Event>),
    NoData,
    Fail(String),
    Hang,
    After(Duration, Box<FetchScript>),
}

/// How a relay answers a publish.
#[derive(Debug, Clone)]
pub enum PublishScript {
    Accept,
    Reject(String),
    Hang,
}

#[derive(Default)]
struct Scripts {
    connect: HashMap<String, ConnectScript>,
    fetch: HashMap<String, FetchScript>,
    publish: HashMap<String, PublishScript>,
    refuse_subscription: HashSet<String>,
}

#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<Scripts>,
    linked: Mutex<HashSet<String>>,
    persistent: Mutex<HashSet<String>>,
    published: Mutex<Vec<(String, String)>>,
    disconnected: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, url: &str, script: ConnectScript) -> &Self {
        self.scripts.lock().connect.insert(url.to_string(), script);
        self
    }

    pub fn on_fetch(&self, url: &str, script: FetchScript) -> &Self {
        self.scripts.lock().fetch.insert(url.to_string(), script);
        self
    }

    pub fn on_publish(&self, url: &str, script: PublishScript) -> &Self {
        self.scripts.lock().publish.insert(url.to_string(), script);
        self
    }

    pub fn refuse_subscription(&self, url: &str) -> &Self {
        self.scripts
            .lock()
            .refuse_subscription
            .insert(url.to_string());
        self
    }

    /// Simulate the link dropping without the orchestrator noticing.
    pub fn drop_link(&self, url: &str) {
        self.linked.lock().remove(url);
    }

    /// (url, event id) of every accepted publish.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Every link currently up, sorted.
    pub fn open_links(&self) -> Vec<String> {
        let mut links: Vec<String> = self.linked.lock().iter().cloned().collect();
        links.sort();
        links
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.disconnected.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_fetch(script: FetchScript) -> BoxFuture<'static, Result<Option<Event>, TransportError>> {
    Box::pin(async move {
        match script {
            FetchScript::Record(event) => Ok(Some(*event)),
            FetchScript::NoData => Ok(None),
            FetchScript::Fail(reason) => Err(TransportError::Protocol(reason)),
            FetchScript::Hang => std::future::pending().await,
            FetchScript::After(delay, next) => {
                tokio::time::sleep(delay).await;
                run_fetch(*next).await
            }
        }
    })
}

impl RelayTransport for MockTransport {
    fn connect<'a>(
        &'a self,
        url: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let script = self
                .scripts
                .lock()
                .connect
                .get(url)
                .cloned()
                .unwrap_or(ConnectScript::Accept);
            match script {
                ConnectScript::Accept => {}
                ConnectScript::AcceptAfter(delay) => tokio::time::sleep(delay).await,
                ConnectScript::Refuse(reason) => return Err(TransportError::Connect(reason)),
                ConnectScript::Hang => std::future::pending::<()>().await,
            }
            self.linked.lock().insert(url.to_string());
            self.persistent.lock().insert(url.to_string());
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        url: &'a str,
        _filter: &'a Filter,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.scripts.lock().refuse_subscription.contains(url) {
                return Err(TransportError::Protocol("blocked: not allowed".to_string()));
            }
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.linked.lock().remove(url);
            self.persistent.lock().remove(url);
            self.disconnected.lock().push(url.to_string());
            Ok(())
        })
    }

    fn is_connected<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.linked.lock().contains(url) })
    }

    fn fetch_relay_list<'a>(
        &'a self,
        url: &'a str,
        _author: &'a PublicKey,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Event>, TransportError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.linked.lock().insert(url.to_string());
            let _guard = self.enter();
            let script = self
                .scripts
                .lock()
                .fetch
                .get(url)
                .cloned()
                .unwrap_or(FetchScript::NoData);
            run_fetch(script).await
        })
    }

    fn publish<'a>(
        &'a self,
        url: &'a str,
        event: &'a Event,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.linked.lock().insert(url.to_string());
            let script = self
                .scripts
                .lock()
                .publish
                .get(url)
                .cloned()
                .unwrap_or(PublishScript::Accept);
            match script {
                PublishScript::Accept => {
                    self.published
                        .lock()
                        .push((url.to_string(), event.id.to_hex()));
                    Ok(())
                }
                PublishScript::Reject(reason) => Err(TransportError::Publish(reason)),
                PublishScript::Hang => std::future::pending().await,
            }
        })
    }

    fn close<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !self.persistent.lock().contains(url) {
                self.linked.lock().remove(url);
            }
        })
    }

    fn disconnect_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.linked.lock().clear();
            self.persistent.lock().clear();
        })
    }
}

/// Build a signed relay-list event naming `relays` (no markers).
pub fn relay_list_event(keys: &Keys, created_at: u64, relays: &[&str]) -> Event {
    let tags: Vec<Tag> = relays
        .iter()
        .map(|url| Tag::parse(["r", *url]).unwrap())
        .collect();
    EventBuilder::new(Kind::RelayList, "")
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}

/// Build a signed relay-list event with explicit markers.
pub fn relay_list_event_with_markers(
    keys: &Keys,
    created_at: u64,
    relays: &[(&str, Option<&str>)],
) -> Event {
    let tags: Vec<Tag> = relays
        .iter()
        .map(|(url, marker)| match marker {
            Some(marker) => Tag::parse(["r", *url, *marker]).unwrap(),
            None => Tag::parse(["r", *url]).unwrap(),
        })
        .collect();
    EventBuilder::new(Kind::RelayList, "")
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}

pub fn record_script(event: &Event) -> FetchScript {
    FetchScript::Record(Box::new(event.clone()))
}
