//! Connection orchestration over a set of tracked endpoints.
//!
//! The orchestrator owns the transport and the [`StatusTracker`], spawns one
//! independent task per connection attempt, and exposes connect, subscribe,
//! retry, and disconnect to callers.
//!
//! # Cancellation
//!
//! All outstanding work belongs to the current *epoch*, a
//! [`CancellationToken`]. [`Orchestrator::request_disconnect`] cancels the
//! epoch, replaces it with a fresh one, moves every endpoint to
//! `Disconnected`, and tears down every transport link. Results from the
//! cancelled epoch are discarded, so the next connection round starts clean.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use nostr_sdk::Filter;
use outbox_core::url::{NormalizeOptions, normalize_relay_url_with_opts};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::info::{CapabilityFetcher, RelayCapabilities};
use super::status::{EndpointStatus, StatusEvent};
use super::tracker::{Endpoint, EndpointFlags, StatusCounts, StatusFeed, StatusTracker};
use crate::error::{Error, Result};
use crate::transport::RelayTransport;

/// Configuration for the connection orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for one connect/handshake attempt.
    pub connect_timeout: Duration,

    /// A link with no recorded traffic for this long is failed by
    /// [`Orchestrator::check_liveness`].
    pub idle_timeout: Duration,

    /// Per-subscriber buffer of the status change channel.
    pub status_channel_capacity: usize,

    /// URL normalization options (e.g. allowing .onion behind a proxy).
    pub normalize: NormalizeOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            status_channel_capacity: 1024,
            normalize: NormalizeOptions::default(),
        }
    }
}

/// Connection attempts started by one [`Orchestrator::connect`] call.
///
/// Dropping the round leaves the attempts running.
pub struct ConnectRound {
    attempts: Vec<(String, JoinHandle<()>)>,
}

impl ConnectRound {
    /// URLs with an attempt in this round.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.attempts.iter().map(|(url, _)| url.as_str())
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Wait until every attempt has resolved or been cancelled.
    pub async fn join(self) {
        for (url, handle) in self.attempts {
            if let Err(e) = handle.await {
                tracing::warn!("Connection task for {} panicked: {}", url, e);
            }
        }
    }
}

/// Outcome of [`Orchestrator::subscribe`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeReport {
    /// Endpoints that accepted the subscription.
    pub accepted: Vec<String>,
    /// Endpoints that refused it, with the reason.
    pub rejected: Vec<(String, String)>,
}

/// Owns the live connections to a set of endpoints.
pub struct Orchestrator {
    transport: Arc<dyn RelayTransport>,
    tracker: Arc<StatusTracker>,
    config: OrchestratorConfig,
    epoch: Mutex<CancellationToken>,
    capabilities: Option<CapabilityFetcher>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn RelayTransport>, config: OrchestratorConfig) -> Self {
        let tracker = Arc::new(StatusTracker::new(config.status_channel_capacity));
        Self {
            transport,
            tracker,
            config,
            epoch: Mutex::new(CancellationToken::new()),
            capabilities: None,
        }
    }

    /// Enable [`refresh_capabilities`](Self::refresh_capabilities).
    pub fn with_capability_fetcher(mut self, fetcher: CapabilityFetcher) -> Self {
        self.capabilities = Some(fetcher);
        self
    }

    pub fn transport(&self) -> Arc<dyn RelayTransport> {
        Arc::clone(&self.transport)
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token of the current epoch; cancelled by the next disconnect request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.epoch.lock().clone()
    }

    fn normalize(&self, url: &str) -> Result<String> {
        normalize_relay_url_with_opts(url, &self.config.normalize)
            .into_result()
            .map_err(Error::InvalidUrl)
    }

    /// Normalized key for lookups, falling back to the raw input.
    fn key(&self, url: &str) -> String {
        self.normalize(url).unwrap_or_else(|_| url.to_string())
    }

    // =========================================================================
    // Endpoint registration
    // =========================================================================

    /// Track an endpoint. Returns its normalized URL.
    pub fn add_endpoint(&self, url: &str, flags: EndpointFlags) -> Result<String> {
        let url = self.normalize(url)?;
        if self.tracker.register(&url, flags) {
            tracing::debug!("Tracking endpoint {}", url);
        }
        Ok(url)
    }

    /// Track several endpoints, skipping (and logging) unusable URLs.
    ///
    /// Returns the normalized URLs that are now tracked, in input order and
    /// without duplicates.
    pub fn add_endpoints<S: AsRef<str>>(&self, urls: &[S], flags: EndpointFlags) -> Vec<String> {
        let mut added: Vec<String> = Vec::with_capacity(urls.len());
        for url in urls {
            match self.add_endpoint(url.as_ref(), flags) {
                Ok(url) if !added.contains(&url) => added.push(url),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping endpoint {}: {}", url.as_ref(), e),
            }
        }
        added
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Start a connection attempt for every `Disconnected` endpoint.
    pub fn connect(&self) -> ConnectRound {
        let mut attempts = Vec::new();
        for url in self
            .tracker
            .urls_where(|s| *s == EndpointStatus::Disconnected)
        {
            match self.tracker.apply(&url, StatusEvent::Connect) {
                Ok(Some(_)) => {
                    let handle = self.spawn_attempt(url.clone());
                    attempts.push((url, handle));
                }
                Ok(None) => {}
                // Another caller moved it in the meantime.
                Err(e) => tracing::debug!("Not connecting {}: {}", url, e),
            }
        }

        if !attempts.is_empty() {
            tracing::info!("Connecting to {} endpoints", attempts.len());
        }
        ConnectRound { attempts }
    }

    /// Start a connection attempt for one `Disconnected` endpoint.
    pub fn connect_endpoint(&self, url: &str) -> Result<JoinHandle<()>> {
        let url = self.normalize(url)?;
        self.tracker.apply(&url, StatusEvent::Connect)?;
        Ok(self.spawn_attempt(url))
    }

    /// Retry an endpoint in `ConnectFailed`. This is the only way out of a
    /// failed state.
    pub fn request_retry(&self, url: &str) -> Result<JoinHandle<()>> {
        let url = self.normalize(url)?;
        self.tracker.apply(&url, StatusEvent::Retry)?;
        tracing::info!("Retrying {}", url);
        Ok(self.spawn_attempt(url))
    }

    /// Spawn a connect attempt for an endpoint already in `Connecting`.
    fn spawn_attempt(&self, url: String) -> JoinHandle<()> {
        let token = self.cancellation_token();
        let transport = Arc::clone(&self.transport);
        let tracker = Arc::clone(&self.tracker);
        let timeout = self.config.connect_timeout;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                res = tokio::time::timeout(timeout, transport.connect(&url, timeout)) => res,
            };

            let event = match outcome {
                Ok(Ok(())) => StatusEvent::HandshakeOk,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to connect to {}: {}", url, e);
                    counter!("relay_connect_failures_total", "reason" => "error").increment(1);
                    StatusEvent::Failure(e.to_string())
                }
                Err(_) => {
                    tracing::warn!("Connection to {} timed out after {:?}", url, timeout);
                    counter!("relay_connect_failures_total", "reason" => "timeout").increment(1);
                    StatusEvent::Failure("connect timed out".to_string())
                }
            };

            if let Err(e) = tracker.apply_in_epoch(&url, event, &token) {
                tracing::debug!("Dropping connect result for {}: {}", url, e);
            }
        })
    }

    /// Open `filter` on every endpoint whose link is up.
    ///
    /// `Connected` endpoints that accept move to `Subscribed`. A refused
    /// subscription leaves the endpoint's status unchanged.
    pub async fn subscribe(&self, filter: &Filter) -> SubscribeReport {
        let token = self.cancellation_token();
        let urls = self.tracker.urls_where(EndpointStatus::is_up);

        let results = join_all(urls.iter().map(|url| async move {
            let result = self.transport.subscribe(url, filter).await;
            (url, result)
        }))
        .await;

        let mut report = SubscribeReport::default();
        for (url, result) in results {
            match result {
                Ok(()) => {
                    self.tracker.record_activity(url);
                    if self.tracker.status(url) == Some(EndpointStatus::Connected)
                        && let Err(e) =
                            self.tracker
                                .apply_in_epoch(url, StatusEvent::SubscriptionAccepted, &token)
                    {
                        tracing::debug!("Subscription on {} not recorded: {}", url, e);
                    }
                    report.accepted.push(url.clone());
                }
                Err(e) => {
                    tracing::warn!("Failed to subscribe {}: {}", url, e);
                    report.rejected.push((url.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "Subscription accepted by {}/{} endpoints",
            report.accepted.len(),
            urls.len()
        );
        report
    }

    /// Cancel all outstanding attempts and in-flight queries, tear down every
    /// transport link (including one-shot links of untracked endpoints), and
    /// move every endpoint to `Disconnected`.
    pub async fn request_disconnect(&self) {
        let previous = {
            let mut epoch = self.epoch.lock();
            std::mem::replace(&mut *epoch, CancellationToken::new())
        };
        previous.cancel();

        let urls = self.tracker.urls_where(|_| true);
        for url in &urls {
            if let Err(e) = self.tracker.apply(url, StatusEvent::Disconnect) {
                tracing::debug!("Disconnect of {} not recorded: {}", url, e);
            }
        }

        let results = join_all(urls.iter().map(|url| self.transport.disconnect(url))).await;
        for (url, result) in urls.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!("Transport teardown for {} failed: {}", url, e);
            }
        }
        self.transport.disconnect_all().await;

        counter!("relay_disconnects_total").increment(1);
        tracing::info!("Disconnected from {} endpoints", urls.len());
    }

    /// Record a transport-level failure observed outside the orchestrator.
    pub fn report_failure(&self, url: &str, reason: &str) -> Result<()> {
        let url = self.normalize(url)?;
        self.tracker
            .apply(&url, StatusEvent::Failure(reason.to_string()))?;
        Ok(())
    }

    /// Note traffic from an endpoint, resetting its idle clock.
    pub fn record_activity(&self, url: &str) {
        self.tracker.record_activity(&self.key(url));
    }

    /// Reconcile tracked status with the transport's actual link state.
    ///
    /// Endpoints whose link dropped, or that have been idle longer than
    /// `idle_timeout`, move to `ConnectFailed`. Returns the failed URLs.
    pub async fn check_liveness(&self) -> Vec<String> {
        let token = self.cancellation_token();
        let urls = self.tracker.urls_where(EndpointStatus::is_up);

        let links = join_all(urls.iter().map(|url| self.transport.is_connected(url))).await;

        let mut failed = Vec::new();
        for (url, linked) in urls.into_iter().zip(links) {
            let reason = if !linked {
                "connection lost"
            } else if self
                .tracker
                .idle_for(&url)
                .is_some_and(|idle| idle >= self.config.idle_timeout)
            {
                "idle timeout"
            } else {
                continue;
            };

            match self
                .tracker
                .apply_in_epoch(&url, StatusEvent::Failure(reason.to_string()), &token)
            {
                Ok(Some(_)) => {
                    tracing::warn!("{}: {}", url, reason);
                    failed.push(url);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Liveness failure for {} not recorded: {}", url, e),
            }
        }

        if !failed.is_empty() {
            tracing::info!("Liveness check failed {} endpoints", failed.len());
        }
        failed
    }

    /// Fetch and store NIP-11 capability metadata for an endpoint.
    pub async fn refresh_capabilities(&self, url: &str) -> Result<RelayCapabilities> {
        let fetcher = self
            .capabilities
            .as_ref()
            .ok_or_else(|| Error::Config("capability fetching is not enabled".to_string()))?;
        let url = self.normalize(url)?;
        let capabilities = fetcher.fetch(&url).await?;
        self.tracker.set_capabilities(&url, capabilities.clone())?;
        Ok(capabilities)
    }

    // =========================================================================
    // Status queries
    // =========================================================================

    pub fn status(&self, url: &str) -> Option<EndpointStatus> {
        self.tracker.status(&self.key(url))
    }

    pub fn endpoint(&self, url: &str) -> Option<Endpoint> {
        self.tracker.endpoint(&self.key(url))
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.tracker.endpoints()
    }

    pub fn statuses(&self) -> BTreeMap<String, EndpointStatus> {
        self.tracker.statuses()
    }

    /// `{connected, subscribed, total}` in O(1).
    pub fn counts(&self) -> StatusCounts {
        self.tracker.counts()
    }

    /// Current statuses plus every later transition.
    pub fn subscribe_status(&self) -> StatusFeed {
        self.tracker.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ConnectScript, MockTransport};

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("wss://relay{}.example.com", i))
            .collect()
    }

    fn setup(config: OrchestratorConfig) -> (Arc<MockTransport>, Orchestrator) {
        let transport = Arc::new(MockTransport::new());
        let orchestrator = Orchestrator::new(transport.clone(), config);
        (transport, orchestrator)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn test_add_endpoints_normalizes_and_dedups() {
        let (_, orch) = setup(OrchestratorConfig::default());
        let added = orch.add_endpoints(
            &[
                "wss://Relay.Example.com/",
                "relay.example.com",
                "wss://localhost",
                "https://other.example.com",
            ],
            EndpointFlags::default(),
        );
        assert_eq!(
            added,
            vec!["wss://relay.example.com", "wss://other.example.com"]
        );
        assert_eq!(orch.counts().total, 2);
        assert_eq!(
            orch.status("RELAY.example.com"),
            Some(EndpointStatus::Disconnected)
        );
    }

    // =========================================================================
    // Connect, fail, retry
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_connect_round() {
        let (_, orch) = setup(OrchestratorConfig::default());
        orch.add_endpoints(&urls(3), EndpointFlags::default());

        let round = orch.connect();
        assert_eq!(round.len(), 3);
        assert!(
            orch.statuses()
                .values()
                .all(|s| *s == EndpointStatus::Connecting)
        );

        round.join().await;
        assert_eq!(
            orch.counts(),
            StatusCounts {
                connected: 3,
                subscribed: 0,
                total: 3
            }
        );
        assert!(orch.endpoint(&urls(3)[0]).unwrap().last_contact.is_some());

        // Nothing left in Disconnected
        assert!(orch.connect().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_manual_retry() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let url = "wss://relay.example.com";
        orch.add_endpoint(url, EndpointFlags::default()).unwrap();
        transport.on_connect(url, ConnectScript::Refuse("connection refused".to_string()));

        orch.connect().join().await;
        assert!(matches!(
            orch.status(url),
            Some(EndpointStatus::ConnectFailed(Some(ref r))) if r.contains("connection refused")
        ));

        // connect() never leaves ConnectFailed on its own
        assert!(orch.connect().is_empty());

        transport.on_connect(url, ConnectScript::Accept);
        orch.request_retry(url).unwrap().await.unwrap();
        assert_eq!(orch.status(url), Some(EndpointStatus::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_only_from_failed() {
        let (_, orch) = setup(OrchestratorConfig::default());
        let url = "wss://relay.example.com";
        orch.add_endpoint(url, EndpointFlags::default()).unwrap();
        assert!(matches!(
            orch.request_retry(url),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let config = OrchestratorConfig {
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (transport, orch) = setup(config);
        let url = "wss://slow.example.com";
        orch.add_endpoint(url, EndpointFlags::default()).unwrap();
        transport.on_connect(url, ConnectScript::Hang);

        let started = tokio::time::Instant::now();
        orch.connect().join().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(
            orch.status(url),
            Some(EndpointStatus::ConnectFailed(Some(
                "connect timed out".to_string()
            )))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_slow_endpoint_does_not_block_others() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let all = urls(3);
        orch.add_endpoints(&all, EndpointFlags::default());
        transport.on_connect(&all[0], ConnectScript::Hang);

        let _round = orch.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(orch.status(&all[0]), Some(EndpointStatus::Connecting));
        assert_eq!(orch.status(&all[1]), Some(EndpointStatus::Connected));
        assert_eq!(orch.status(&all[2]), Some(EndpointStatus::Connected));
    }

    // =========================================================================
    // Subscribe
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_moves_connected_to_subscribed() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let all = urls(3);
        orch.add_endpoints(&all, EndpointFlags::default());
        transport.refuse_subscription(&all[2]);
        orch.connect().join().await;

        let report = orch.subscribe(&Filter::new().limit(0)).await;
        assert_eq!(report.accepted, vec![all[0].clone(), all[1].clone()]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, all[2]);

        assert_eq!(orch.status(&all[0]), Some(EndpointStatus::Subscribed));
        assert_eq!(orch.status(&all[2]), Some(EndpointStatus::Connected));
        assert_eq!(orch.counts().subscribed, 2);

        // A second subscription keeps Subscribed endpoints where they are.
        let report = orch.subscribe(&Filter::new().limit(0)).await;
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(orch.counts().subscribed, 2);
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_scenario() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let all = urls(5);
        orch.add_endpoints(&all, EndpointFlags::default());
        for url in &all[..3] {
            transport.on_connect(url, ConnectScript::Hang);
        }

        let _round = orch.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        orch.subscribe(&Filter::new().limit(0)).await;

        let statuses = orch.statuses();
        assert_eq!(
            statuses
                .values()
                .filter(|s| **s == EndpointStatus::Connecting)
                .count(),
            3
        );
        assert_eq!(
            statuses
                .values()
                .filter(|s| **s == EndpointStatus::Subscribed)
                .count(),
            2
        );

        let mut feed = orch.subscribe_status();
        orch.request_disconnect().await;

        assert!(
            orch.statuses()
                .values()
                .all(|s| *s == EndpointStatus::Disconnected)
        );
        assert_eq!(orch.counts().connected, 0);
        assert_eq!(orch.counts().subscribed, 0);
        assert_eq!(transport.disconnected().len(), 5);
        assert!(transport.open_links().is_empty());

        // Fresh round: every endpoint goes Disconnected -> Connecting -> Connected.
        for url in &all {
            transport.on_connect(url, ConnectScript::Accept);
        }
        orch.connect().join().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut per_url: BTreeMap<String, Vec<EndpointStatus>> = BTreeMap::new();
        while let Some(change) = feed.try_next() {
            per_url.entry(change.url.clone()).or_default().push(change.to);
        }
        for url in &all {
            assert_eq!(
                per_url[url],
                vec![
                    EndpointStatus::Disconnected,
                    EndpointStatus::Connecting,
                    EndpointStatus::Connected
                ],
                "{}",
                url
            );
        }
        assert_eq!(orch.counts().subscribed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_untracked_links() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let author = nostr_sdk::Keys::generate().public_key();
        transport
            .fetch_relay_list("wss://indexer.example.com", &author, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(transport.open_links(), vec!["wss://indexer.example.com"]);

        orch.request_disconnect().await;
        assert!(transport.open_links().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_attempt_cannot_land_after_disconnect() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let url = "wss://relay.example.com";
        orch.add_endpoint(url, EndpointFlags::default()).unwrap();
        transport.on_connect(url, ConnectScript::AcceptAfter(Duration::from_secs(5)));

        let _stale = orch.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        orch.request_disconnect().await;

        transport.on_connect(url, ConnectScript::Hang);
        let _fresh = orch.connect();
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(orch.status(url), Some(EndpointStatus::Connecting));
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_check_liveness_detects_dropped_link() {
        let (transport, orch) = setup(OrchestratorConfig::default());
        let all = urls(2);
        orch.add_endpoints(&all, EndpointFlags::default());
        orch.connect().join().await;

        transport.drop_link(&all[0]);
        let failed = orch.check_liveness().await;

        assert_eq!(failed, vec![all[0].clone()]);
        assert_eq!(
            orch.status(&all[0]),
            Some(EndpointStatus::ConnectFailed(Some(
                "connection lost".to_string()
            )))
        );
        assert_eq!(orch.status(&all[1]), Some(EndpointStatus::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_liveness_idle_timeout() {
        let config = OrchestratorConfig {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let (_, orch) = setup(config);
        let all = urls(2);
        orch.add_endpoints(&all, EndpointFlags::default());
        orch.connect().join().await;

        tokio::time::advance(Duration::from_secs(45)).await;
        orch.record_activity(&all[1]);
        tokio::time::advance(Duration::from_secs(20)).await;

        let failed = orch.check_liveness().await;
        assert_eq!(failed, vec![all[0].clone()]);
        assert_eq!(orch.status(&all[1]), Some(EndpointStatus::Connected));
    }

    #[tokio::test]
    async fn test_report_failure_and_capabilities_disabled() {
        let (_, orch) = setup(OrchestratorConfig::default());
        let url = "wss://relay.example.com";
        orch.add_endpoint(url, EndpointFlags::default()).unwrap();

        // Not connected yet: a failure report is not a valid transition.
        assert!(orch.report_failure(url, "reset").is_err());
        assert!(matches!(
            orch.refresh_capabilities(url).await,
            Err(Error::Config(_))
        ));
    }
}
