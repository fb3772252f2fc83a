//! Per-identity discovery session state.
//!
//! A session holds one [`QueryState`] per candidate endpoint. Outcomes are
//! written once under the session mutex, and the [`Progress`] counts are
//! updated under the same lock, so every observer sees counts that sum to the
//! number of candidates.

use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::PublicKey;
use outbox_core::VersionedRecord;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use super::reconcile::{OutlierPolicy, Reconciliation, reconcile};

/// Per-endpoint query status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    /// A well-formed record was returned before the deadline.
    Success,
    /// The endpoint answered and has no record for the identity.
    NoData,
    /// Transport or protocol error, or an invalid record.
    Failed(String),
    /// No answer within the attempt deadline or the session ceiling.
    Timeout,
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Failed(_) => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Terminal outcome of one query attempt.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Success(VersionedRecord),
    NoData,
    Failed(String),
    Timeout,
}

/// One endpoint's part in a discovery session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryState {
    pub endpoint: String,
    pub status: QueryStatus,
    pub result: Option<VersionedRecord>,
    /// Time from session start to the terminal outcome.
    pub elapsed_ms: Option<u64>,
}

impl QueryState {
    pub(crate) fn pending(endpoint: String) -> Self {
        Self {
            endpoint,
            status: QueryStatus::Pending,
            result: None,
            elapsed_ms: None,
        }
    }

    pub(crate) fn failed(endpoint: String, reason: String) -> Self {
        Self {
            endpoint,
            status: QueryStatus::Failed(reason),
            result: None,
            elapsed_ms: Some(0),
        }
    }
}

/// Live outcome counts of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub pending: usize,
    pub success: usize,
    pub no_data: usize,
    pub failed: usize,
    pub timeout: usize,
    pub total: usize,
}

impl Progress {
    fn from_states(states: &[QueryState]) -> Self {
        let mut progress = Self {
            total: states.len(),
            ..Default::default()
        };
        for state in states {
            *progress.slot(&state.status) += 1;
        }
        progress
    }

    fn slot(&mut self, status: &QueryStatus) -> &mut usize {
        match status {
            QueryStatus::Pending => &mut self.pending,
            QueryStatus::Success => &mut self.success,
            QueryStatus::NoData => &mut self.no_data,
            QueryStatus::Failed(_) => &mut self.failed,
            QueryStatus::Timeout => &mut self.timeout,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    /// Number of endpoints with a terminal outcome.
    pub fn resolved(&self) -> usize {
        self.total - self.pending
    }
}

struct SessionState {
    states: Vec<QueryState>,
    finished_after: Option<Duration>,
}

pub(crate) struct Session {
    pubkey: PublicKey,
    started: Instant,
    state: Mutex<SessionState>,
    progress: watch::Sender<Progress>,
}

impl Session {
    pub(crate) fn new(pubkey: PublicKey, states: Vec<QueryState>) -> Arc<Self> {
        let progress = Progress::from_states(&states);
        let finished_after = progress.is_complete().then_some(Duration::ZERO);
        let (sender, _) = watch::channel(progress);
        Arc::new(Self {
            pubkey,
            started: Instant::now(),
            state: Mutex::new(SessionState {
                states,
                finished_after,
            }),
            progress: sender,
        })
    }

    pub(crate) fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    /// Indices and URLs of endpoints still pending.
    pub(crate) fn pending(&self) -> Vec<(usize, String)> {
        self.state
            .lock()
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == QueryStatus::Pending)
            .map(|(i, s)| (i, s.endpoint.clone()))
            .collect()
    }

    /// Record the outcome for one endpoint.
    ///
    /// Returns false if the endpoint already had an outcome; outcomes never
    /// change once assigned.
    pub(crate) fn resolve(&self, index: usize, outcome: Outcome) -> bool {
        let mut guard = self.state.lock();
        let elapsed = self.started.elapsed();
        let Some(state) = guard.states.get_mut(index) else {
            return false;
        };
        if state.status.is_terminal() {
            return false;
        }

        let (status, result) = match outcome {
            Outcome::Success(record) => (QueryStatus::Success, Some(record)),
            Outcome::NoData => (QueryStatus::NoData, None),
            Outcome::Failed(reason) => (QueryStatus::Failed(reason), None),
            Outcome::Timeout => (QueryStatus::Timeout, None),
        };
        state.status = status.clone();
        state.result = result;
        state.elapsed_ms = Some(elapsed.as_millis() as u64);

        let mut complete = false;
        self.progress.send_modify(|progress| {
            progress.pending -= 1;
            *progress.slot(&status) += 1;
            complete = progress.is_complete();
        });
        if complete {
            guard.finished_after = Some(elapsed);
        }
        true
    }

    /// Force every still-pending endpoint to `outcome`. Returns how many.
    pub(crate) fn resolve_pending(&self, outcome: Outcome) -> usize {
        self.pending()
            .into_iter()
            .filter(|(index, _)| self.resolve(*index, outcome.clone()))
            .count()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.progress.borrow().is_complete()
    }
}

/// Handle to a running or finished discovery session.
///
/// Handles are cheap to clone; every clone observes the same session.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Identity this session discovers.
    pub fn pubkey(&self) -> &PublicKey {
        self.session.pubkey()
    }

    /// Current outcome counts.
    pub fn progress(&self) -> Progress {
        *self.session.progress.borrow()
    }

    /// Receiver that yields the current counts immediately, then every update.
    pub fn watch_progress(&self) -> watch::Receiver<Progress> {
        let mut receiver = self.session.progress.subscribe();
        receiver.mark_changed();
        receiver
    }

    /// Snapshot of every endpoint's state, in candidate order.
    pub fn states(&self) -> Vec<QueryState> {
        self.session.state.lock().states.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.session.is_complete()
    }

    /// Whether both handles refer to the same session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }

    /// Wait for every endpoint to reach a terminal outcome.
    pub async fn wait(&self) -> SessionReport {
        let mut receiver = self.session.progress.subscribe();
        // The sender lives as long as the session, so this cannot fail.
        let _ = receiver.wait_for(Progress::is_complete).await;
        self.report()
    }

    /// Report of the session as it stands now.
    pub fn report(&self) -> SessionReport {
        let state = self.session.state.lock();
        SessionReport {
            pubkey: self.session.pubkey.to_hex(),
            progress: *self.session.progress.borrow(),
            states: state.states.clone(),
            elapsed_ms: state
                .finished_after
                .unwrap_or_else(|| self.session.started.elapsed())
                .as_millis() as u64,
        }
    }
}

/// Outcome of a discovery session: aggregate counts plus per-endpoint detail.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub pubkey: String,
    pub progress: Progress,
    pub states: Vec<QueryState>,
    pub elapsed_ms: u64,
}

impl SessionReport {
    /// Records returned by successful endpoints.
    pub fn records(&self) -> Vec<VersionedRecord> {
        self.states
            .iter()
            .filter_map(|s| s.result.clone())
            .collect()
    }

    /// Endpoints that failed or timed out, with their status.
    pub fn failures(&self) -> Vec<(&str, &QueryStatus)> {
        self.states
            .iter()
            .filter(|s| matches!(s.status, QueryStatus::Failed(_) | QueryStatus::Timeout))
            .map(|s| (s.endpoint.as_str(), &s.status))
            .collect()
    }

    /// Endpoints that answered without a record.
    pub fn missing(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|s| s.status == QueryStatus::NoData)
            .map(|s| s.endpoint.as_str())
            .collect()
    }

    /// Group the successful records by version.
    pub fn reconcile(&self, policy: &OutlierPolicy) -> Reconciliation {
        reconcile(&self.records(), policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::Keys;

    fn session(n: usize) -> Arc<Session> {
        let states = (0..n)
            .map(|i| QueryState::pending(format!("wss://relay{}.example.com", i)))
            .collect();
        Session::new(Keys::generate().public_key(), states)
    }

    #[test]
    fn test_progress_sums_to_total() {
        let session = session(4);
        assert_eq!(session.progress.borrow().pending, 4);

        session.resolve(0, Outcome::NoData);
        session.resolve(1, Outcome::Failed("refused".to_string()));
        session.resolve(2, Outcome::Timeout);

        let p = *session.progress.borrow();
        assert_eq!(p.pending + p.success + p.no_data + p.failed + p.timeout, p.total);
        assert_eq!(p.resolved(), 3);
        assert!(!p.is_complete());
    }

    #[test]
    fn test_outcome_is_immutable() {
        let session = session(1);
        assert!(session.resolve(0, Outcome::NoData));
        assert!(!session.resolve(0, Outcome::Timeout));
        assert!(!session.resolve(5, Outcome::Timeout));

        let handle = SessionHandle::new(session);
        assert_eq!(handle.states()[0].status, QueryStatus::NoData);
        assert_eq!(handle.progress().timeout, 0);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_resolve_pending_only_touches_pending() {
        let session = session(3);
        session.resolve(1, Outcome::NoData);
        assert_eq!(session.resolve_pending(Outcome::Timeout), 2);

        let handle = SessionHandle::new(session);
        let p = handle.progress();
        assert_eq!((p.no_data, p.timeout, p.pending), (1, 2, 0));
    }

    #[test]
    fn test_presolved_states_complete_immediately() {
        let states = vec![QueryState::failed(
            "wss://bad".to_string(),
            "invalid".to_string(),
        )];
        let handle = SessionHandle::new(Session::new(Keys::generate().public_key(), states));
        assert!(handle.is_complete());
        assert_eq!(handle.report().elapsed_ms, 0);
    }

    #[tokio::test]
    async fn test_watch_progress_replays_latest() {
        let session = session(2);
        session.resolve(0, Outcome::NoData);
        let handle = SessionHandle::new(session.clone());

        let mut rx = handle.watch_progress();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().no_data, 1);

        session.resolve(1, Outcome::Timeout);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_complete());

        let report = handle.wait().await;
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.missing(), vec!["wss://relay0.example.com"]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&QueryStatus::Failed("refused".to_string())).unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"refused"}"#);
        assert_eq!(
            serde_json::to_string(&QueryStatus::NoData).unwrap(),
            r#"{"status":"no_data"}"#
        );
    }
}
