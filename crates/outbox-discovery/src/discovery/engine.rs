//! Scatter-gather discovery of an identity's relay-list record.
//!
//! [`DiscoveryEngine::start`] normalizes the candidate endpoints, creates a
//! session, and spawns a driver task that queries the candidates in
//! fixed-size batches. A batch starts only after the previous one fully
//! resolved; each attempt has its own deadline and the whole run is bounded by
//! the session ceiling. The driver also watches the orchestrator's
//! cancellation epoch, so `request_disconnect` ends in-flight sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use nostr_sdk::PublicKey;
use outbox_core::VersionedRecord;
use outbox_core::url::{NormalizeOptions, normalize_relay_url_with_opts};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::reconcile::OutlierPolicy;
use super::republish::Republisher;
use super::session::{Outcome, QueryState, Session, SessionHandle};
use crate::error::{Error, Result, TransportError};
use crate::relay::Orchestrator;
use crate::transport::RelayTransport;

/// Configuration for discovery sessions.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Endpoints queried concurrently per batch.
    pub batch_size: usize,

    /// Deadline for one endpoint's query.
    pub attempt_timeout: Duration,

    /// Ceiling for the whole multi-batch run.
    pub session_timeout: Duration,

    /// Deadline for one republish attempt.
    pub publish_timeout: Duration,

    /// Outlier thresholds used when reconciling results.
    pub outliers: OutlierPolicy,

    /// URL normalization options applied to candidates.
    pub normalize: NormalizeOptions,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            attempt_timeout: Duration::from_secs(8),
            session_timeout: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(8),
            outliers: OutlierPolicy::default(),
            normalize: NormalizeOptions::default(),
        }
    }
}

type SessionTable = Arc<Mutex<HashMap<String, Arc<Session>>>>;

/// Runs discovery sessions, at most one in flight per identity.
pub struct DiscoveryEngine {
    orchestrator: Arc<Orchestrator>,
    config: DiscoveryConfig,
    sessions: SessionTable,
}

impl DiscoveryEngine {
    pub fn new(orchestrator: Arc<Orchestrator>, config: DiscoveryConfig) -> Self {
        Self {
            orchestrator,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Number of sessions still running.
    pub fn in_flight(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| !s.is_complete())
            .count()
    }

    /// Republisher sharing this engine's transport and publish timeout.
    pub fn republisher(&self) -> Republisher {
        Republisher::new(self.orchestrator.transport(), self.config.publish_timeout)
    }

    /// Start discovering `pubkey`'s relay list, or join the session already
    /// in flight for it.
    ///
    /// When joining, `candidates` is ignored; the returned handle observes the
    /// existing session. Must be called from within a tokio runtime.
    ///
    /// Candidates that fail normalization stay in the session as `Failed`, but
    /// duplicates (after normalization) are dropped, so the session's
    /// `Progress::total` counts distinct valid URLs plus invalid entries and
    /// can be smaller than `candidates.len()`.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCandidates`] if `candidates` is empty
    /// - [`Error::NoValidCandidates`] if no candidate survives normalization
    pub fn start<S: AsRef<str>>(
        &self,
        pubkey: &PublicKey,
        candidates: &[S],
    ) -> Result<SessionHandle> {
        self.launch(pubkey, candidates, false)
    }

    /// Start a new session even if one is in flight for `pubkey`.
    ///
    /// The previous session is detached from the in-flight table and runs to
    /// completion on its own; existing handles keep observing it.
    pub fn start_fresh<S: AsRef<str>>(
        &self,
        pubkey: &PublicKey,
        candidates: &[S],
    ) -> Result<SessionHandle> {
        self.launch(pubkey, candidates, true)
    }

    /// Like [`start`](Self::start), parsing the identity from hex or npub.
    pub fn start_for<S: AsRef<str>>(
        &self,
        identity: &str,
        candidates: &[S],
    ) -> Result<SessionHandle> {
        let pubkey = PublicKey::parse(identity.trim())
            .map_err(|e| Error::InvalidIdentity(format!("{}: {}", identity, e)))?;
        self.start(&pubkey, candidates)
    }

    fn launch<S: AsRef<str>>(
        &self,
        pubkey: &PublicKey,
        candidates: &[S],
        fresh: bool,
    ) -> Result<SessionHandle> {
        let states = self.prepare(candidates)?;
        let key = pubkey.to_hex();

        let session = {
            let mut sessions = self.sessions.lock();
            if !fresh
                && let Some(existing) = sessions.get(&key)
                && !existing.is_complete()
            {
                counter!("discovery_sessions_joined_total").increment(1);
                tracing::debug!("Joining in-flight discovery for {}", key);
                return Ok(SessionHandle::new(Arc::clone(existing)));
            }

            let session = Session::new(*pubkey, states);
            sessions.insert(key.clone(), Arc::clone(&session));
            session
        };

        counter!("discovery_sessions_total").increment(1);
        tracing::info!(
            "Starting discovery for {} across {} endpoints",
            key,
            session.pending().len()
        );

        let driver = Driver {
            session: Arc::clone(&session),
            transport: self.orchestrator.transport(),
            orchestrator: Arc::clone(&self.orchestrator),
            cancel: self.orchestrator.cancellation_token(),
            config: self.config.clone(),
            sessions: Arc::clone(&self.sessions),
            key,
        };
        tokio::spawn(driver.run());

        Ok(SessionHandle::new(session))
    }

    /// Normalize candidates into initial query states.
    ///
    /// Invalid URLs resolve immediately as `Failed`; duplicates are dropped.
    fn prepare<S: AsRef<str>>(&self, candidates: &[S]) -> Result<Vec<QueryState>> {
        if candidates.is_empty() {
            return Err(Error::EmptyCandidates);
        }

        let mut seen = HashSet::new();
        let mut states = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let raw = candidate.as_ref().trim();
            match normalize_relay_url_with_opts(raw, &self.config.normalize).into_result() {
                Ok(url) => {
                    if seen.insert(url.clone()) {
                        states.push(QueryState::pending(url));
                    } else {
                        tracing::debug!("Dropping duplicate candidate {}", raw);
                    }
                }
                Err(reason) => {
                    tracing::debug!("Rejecting candidate {}: {}", raw, reason);
                    counter!("discovery_attempts_total", "outcome" => "failed").increment(1);
                    states.push(QueryState::failed(raw.to_string(), reason));
                }
            }
        }

        if seen.is_empty() {
            return Err(Error::NoValidCandidates(candidates.len()));
        }
        Ok(states)
    }
}

/// Background task that runs one session to completion.
struct Driver {
    session: Arc<Session>,
    transport: Arc<dyn RelayTransport>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
    config: DiscoveryConfig,
    sessions: SessionTable,
    key: String,
}

impl Driver {
    async fn run(self) {
        let started = Instant::now();
        gauge!("discovery_sessions_active").increment(1.0);
        let candidates: Vec<String> = self
            .session
            .pending()
            .into_iter()
            .map(|(_, url)| url)
            .collect();

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                let n = self.session.resolve_pending(Outcome::Failed("cancelled".to_string()));
                counter!("discovery_attempts_total", "outcome" => "failed").increment(n as u64);
                tracing::info!("Discovery for {} cancelled with {} attempts pending", self.key, n);
            }

            result = tokio::time::timeout(self.config.session_timeout, self.run_batches()) => {
                if result.is_err() {
                    let n = self.session.resolve_pending(Outcome::Timeout);
                    counter!("discovery_attempts_total", "outcome" => "timeout")
                        .increment(n as u64);
                    tracing::warn!(
                        "Discovery for {} hit the {:?} ceiling with {} attempts pending",
                        self.key,
                        self.config.session_timeout,
                        n
                    );
                }
            }
        }

        // Batches close their own links; this covers attempts cut short by the
        // ceiling or a cancellation.
        join_all(candidates.iter().map(|url| self.transport.close(url))).await;

        {
            let mut sessions = self.sessions.lock();
            if sessions
                .get(&self.key)
                .is_some_and(|s| Arc::ptr_eq(s, &self.session))
            {
                sessions.remove(&self.key);
            }
        }

        gauge!("discovery_sessions_active").decrement(1.0);
        histogram!("discovery_session_duration_seconds").record(started.elapsed().as_secs_f64());

        let p = SessionHandle::new(Arc::clone(&self.session)).progress();
        tracing::info!(
            "Discovery for {} complete: {} success, {} no data, {} failed, {} timeout",
            self.key,
            p.success,
            p.no_data,
            p.failed,
            p.timeout
        );
    }

    async fn run_batches(&self) {
        let pending = self.session.pending();
        let batch_size = self.config.batch_size.max(1);

        for (n, batch) in pending.chunks(batch_size).enumerate() {
            tracing::debug!(
                "Discovery for {}: batch {} with {} endpoints",
                self.key,
                n + 1,
                batch.len()
            );
            join_all(batch.iter().map(|(index, url)| self.attempt(*index, url))).await;
            join_all(batch.iter().map(|(_, url)| self.transport.close(url))).await;
        }
    }

    async fn attempt(&self, index: usize, url: &str) {
        let dispatched = Instant::now();
        let outcome = query_endpoint(
            self.transport.as_ref(),
            self.session.pubkey(),
            url,
            self.config.attempt_timeout,
        )
        .await;

        if matches!(outcome, Outcome::Success(_) | Outcome::NoData) {
            self.orchestrator.record_activity(url);
        }
        match &outcome {
            Outcome::Failed(reason) => tracing::debug!("{}: query failed: {}", url, reason),
            Outcome::Timeout => tracing::debug!("{}: query timed out", url),
            Outcome::Success(record) => {
                tracing::debug!("{}: relay list version {}", url, record.version)
            }
            Outcome::NoData => tracing::debug!("{}: no relay list", url),
        }

        let label = outcome_label(&outcome);
        if self.session.resolve(index, outcome) {
            counter!("discovery_attempts_total", "outcome" => label).increment(1);
            histogram!("discovery_attempt_duration_seconds")
                .record(dispatched.elapsed().as_secs_f64());
        }
    }
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success(_) => "success",
        Outcome::NoData => "no_data",
        Outcome::Failed(_) => "failed",
        Outcome::Timeout => "timeout",
    }
}

/// Query one endpoint, mapping every result to a terminal outcome.
async fn query_endpoint(
    transport: &dyn RelayTransport,
    pubkey: &PublicKey,
    url: &str,
    timeout: Duration,
) -> Outcome {
    let fetch = transport.fetch_relay_list(url, pubkey, timeout);
    match tokio::time::timeout(timeout, fetch).await {
        Err(_) | Ok(Err(TransportError::Timeout)) => Outcome::Timeout,
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Ok(Ok(None)) => Outcome::NoData,
        Ok(Ok(Some(event))) => match VersionedRecord::from_event(&event, pubkey, url) {
            Ok(record) => Outcome::Success(record),
            Err(e) => Outcome::Failed(format!("invalid record: {}", e)),
        },
    }
}
