//! Endpoint status registry with ordered change notifications.
//!
//! Each endpoint lives in its own cell behind a `parking_lot::Mutex`, so a
//! transition only contends with other operations on the same endpoint. The
//! map itself is behind an `RwLock` that is write-locked only to register new
//! endpoints.
//!
//! Transitions are validated by [`EndpointStatus::transition`], stamped with a
//! per-endpoint sequence number, and broadcast while the cell lock is held.
//! Every subscriber therefore sees one endpoint's changes in the order they
//! were applied.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::info::RelayCapabilities;
use super::status::{EndpointStatus, StatusEvent};
use crate::error::{Error, Result};

/// Read/write capability flags of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointFlags {
    pub read: bool,
    pub write: bool,
}

impl Default for EndpointFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// Everything known about one tracked endpoint.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Endpoint {
    /// Normalized URL.
    pub url: String,
    pub read: bool,
    pub write: bool,
    pub capabilities: Option<RelayCapabilities>,
    pub status: EndpointStatus,
    /// Last successful contact (handshake or observed traffic).
    pub last_contact: Option<DateTime<Utc>>,
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub url: String,
    pub from: EndpointStatus,
    pub to: EndpointStatus,
    /// Per-endpoint sequence number, starting at 1.
    pub seq: u64,
}

/// Aggregate counts over all tracked endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    /// Endpoints whose transport is up (Connected or Subscribed).
    pub connected: usize,
    pub subscribed: usize,
    pub total: usize,
}

struct CellState {
    endpoint: Endpoint,
    seq: u64,
    last_activity: Option<Instant>,
}

struct EndpointCell {
    state: Mutex<CellState>,
}

type CellMap = RwLock<HashMap<String, Arc<EndpointCell>>>;

/// Status and sequence number of every endpoint, read cell by cell.
fn snapshot(cells: &CellMap) -> BTreeMap<String, (EndpointStatus, u64)> {
    let cells: Vec<Arc<EndpointCell>> = cells.read().values().cloned().collect();
    cells
        .iter()
        .map(|cell| {
            let state = cell.state.lock();
            (
                state.endpoint.url.clone(),
                (state.endpoint.status.clone(), state.seq),
            )
        })
        .collect()
}

/// Thread-safe registry of endpoint statuses.
pub struct StatusTracker {
    cells: Arc<CellMap>,
    connected: AtomicUsize,
    subscribed: AtomicUsize,
    total: AtomicUsize,
    sender: broadcast::Sender<StatusChange>,
}

impl StatusTracker {
    /// Create a tracker whose change channel buffers `channel_capacity`
    /// transitions per subscriber.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            cells: Arc::new(RwLock::new(HashMap::new())),
            connected: AtomicUsize::new(0),
            subscribed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            sender,
        }
    }

    /// Register an endpoint in `Disconnected`, or update its flags if known.
    ///
    /// Returns true if the endpoint was new.
    pub fn register(&self, url: &str, flags: EndpointFlags) -> bool {
        if let Some(cell) = self.cell(url) {
            let mut state = cell.state.lock();
            state.endpoint.read = flags.read;
            state.endpoint.write = flags.write;
            return false;
        }

        let mut cells = self.cells.write();
        if cells.contains_key(url) {
            return false;
        }
        cells.insert(
            url.to_string(),
            Arc::new(EndpointCell {
                state: Mutex::new(CellState {
                    endpoint: Endpoint {
                        url: url.to_string(),
                        read: flags.read,
                        write: flags.write,
                        capabilities: None,
                        status: EndpointStatus::Disconnected,
                        last_contact: None,
                    },
                    seq: 0,
                    last_activity: None,
                }),
            }),
        );
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("relay_tracked").set(total as f64);
        true
    }

    /// Apply a status event to an endpoint.
    ///
    /// Returns the applied change, or `None` when the event leaves the status
    /// unchanged (disconnecting an already disconnected endpoint).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEndpoint`] if the endpoint is not registered, and
    /// [`Error::InvalidTransition`] if the event is not valid in the current
    /// status. Rejected events change nothing and emit nothing.
    pub fn apply(&self, url: &str, event: StatusEvent) -> Result<Option<StatusChange>> {
        self.apply_guarded(url, event, None)
    }

    /// Like [`apply`](Self::apply), but does nothing if `epoch` has been
    /// cancelled. The check happens under the endpoint's lock, so a result
    /// from a superseded connection round can never land after the
    /// disconnect that cancelled it.
    pub fn apply_in_epoch(
        &self,
        url: &str,
        event: StatusEvent,
        epoch: &CancellationToken,
    ) -> Result<Option<StatusChange>> {
        self.apply_guarded(url, event, Some(epoch))
    }

    fn apply_guarded(
        &self,
        url: &str,
        event: StatusEvent,
        epoch: Option<&CancellationToken>,
    ) -> Result<Option<StatusChange>> {
        let cell = self
            .cell(url)
            .ok_or_else(|| Error::UnknownEndpoint(url.to_string()))?;
        let mut state = cell.state.lock();

        if epoch.is_some_and(|token| token.is_cancelled()) {
            return Ok(None);
        }

        let from = state.endpoint.status.clone();
        let Some(to) = from.transition(&event) else {
            counter!("relay_transitions_rejected_total").increment(1);
            return Err(Error::InvalidTransition {
                url: url.to_string(),
                from,
                event: event.to_string(),
            });
        };

        if to == from {
            return Ok(None);
        }

        if event == StatusEvent::HandshakeOk {
            state.endpoint.last_contact = Some(Utc::now());
            state.last_activity = Some(Instant::now());
        }

        self.adjust_counts(&from, &to);
        state.endpoint.status = to.clone();
        state.seq += 1;

        let change = StatusChange {
            url: url.to_string(),
            from,
            to,
            seq: state.seq,
        };

        counter!("relay_status_transitions_total", "to" => change.to.label()).increment(1);
        tracing::debug!("{}: {} -> {}", url, change.from, change.to);

        // No receivers is fine; the snapshot still reflects the change.
        let _ = self.sender.send(change.clone());

        Ok(Some(change))
    }

    fn adjust_counts(&self, from: &EndpointStatus, to: &EndpointStatus) {
        if from.is_up() != to.is_up() {
            if to.is_up() {
                self.connected.fetch_add(1, Ordering::Relaxed);
            } else {
                self.connected.fetch_sub(1, Ordering::Relaxed);
            }
            gauge!("relay_connected").set(self.connected.load(Ordering::Relaxed) as f64);
        }

        let was_subscribed = *from == EndpointStatus::Subscribed;
        let is_subscribed = *to == EndpointStatus::Subscribed;
        if was_subscribed != is_subscribed {
            if is_subscribed {
                self.subscribed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.subscribed.fetch_sub(1, Ordering::Relaxed);
            }
            gauge!("relay_subscribed").set(self.subscribed.load(Ordering::Relaxed) as f64);
        }
    }

    fn cell(&self, url: &str) -> Option<Arc<EndpointCell>> {
        self.cells.read().get(url).cloned()
    }

    fn all_cells(&self) -> Vec<Arc<EndpointCell>> {
        self.cells.read().values().cloned().collect()
    }

    /// Current status of one endpoint.
    pub fn status(&self, url: &str) -> Option<EndpointStatus> {
        self.cell(url)
            .map(|cell| cell.state.lock().endpoint.status.clone())
    }

    /// Full record of one endpoint.
    pub fn endpoint(&self, url: &str) -> Option<Endpoint> {
        self.cell(url).map(|cell| cell.state.lock().endpoint.clone())
    }

    /// All endpoints, sorted by URL.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .all_cells()
            .iter()
            .map(|cell| cell.state.lock().endpoint.clone())
            .collect();
        endpoints.sort_by(|a, b| a.url.cmp(&b.url));
        endpoints
    }

    /// URLs of endpoints whose status matches `pred`, sorted.
    pub fn urls_where(&self, pred: impl Fn(&EndpointStatus) -> bool) -> Vec<String> {
        let mut urls: Vec<String> = self
            .all_cells()
            .iter()
            .filter_map(|cell| {
                let state = cell.state.lock();
                pred(&state.endpoint.status).then(|| state.endpoint.url.clone())
            })
            .collect();
        urls.sort();
        urls
    }

    /// Map of every endpoint to its current status.
    pub fn statuses(&self) -> BTreeMap<String, EndpointStatus> {
        self.snapshot_with_seqs()
            .into_iter()
            .map(|(url, (status, _))| (url, status))
            .collect()
    }

    fn snapshot_with_seqs(&self) -> BTreeMap<String, (EndpointStatus, u64)> {
        snapshot(&self.cells)
    }

    /// Aggregate counts, maintained incrementally.
    pub fn counts(&self) -> StatusCounts {
        StatusCounts {
            connected: self.connected.load(Ordering::Relaxed),
            subscribed: self.subscribed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to status changes.
    ///
    /// The returned feed starts with the current status of every endpoint and
    /// then yields each later transition exactly once, in per-endpoint order.
    pub fn subscribe(&self) -> StatusFeed {
        // Receiver first: anything applied after this point is either in the
        // snapshot (seq <= snapshot seq) or delivered by the receiver.
        let receiver = self.sender.subscribe();
        let snapshot = self.snapshot_with_seqs();

        let seen = snapshot
            .iter()
            .map(|(url, (_, seq))| (url.clone(), *seq))
            .collect();
        let current = snapshot
            .into_iter()
            .map(|(url, (status, _))| (url, status))
            .collect();

        StatusFeed {
            current,
            seen,
            receiver,
            cells: Arc::downgrade(&self.cells),
            resynced: VecDeque::new(),
        }
    }

    /// Store capability metadata for an endpoint.
    pub fn set_capabilities(&self, url: &str, capabilities: RelayCapabilities) -> Result<()> {
        let cell = self
            .cell(url)
            .ok_or_else(|| Error::UnknownEndpoint(url.to_string()))?;
        cell.state.lock().endpoint.capabilities = Some(capabilities);
        Ok(())
    }

    /// Record traffic from an endpoint. Unknown endpoints are ignored.
    pub fn record_activity(&self, url: &str) {
        if let Some(cell) = self.cell(url) {
            let mut state = cell.state.lock();
            state.endpoint.last_contact = Some(Utc::now());
            state.last_activity = Some(Instant::now());
        }
    }

    /// Time since the last recorded activity, if any.
    pub fn idle_for(&self, url: &str) -> Option<Duration> {
        self.cell(url)
            .and_then(|cell| cell.state.lock().last_activity)
            .map(|at| at.elapsed())
    }
}

/// A subscriber's view of endpoint statuses: the current map plus ordered
/// deltas.
///
/// Endpoints registered after the feed was created appear with their first
/// transition. If the subscriber falls more than the channel capacity behind,
/// the feed re-reads every endpoint from the tracker and yields one change per
/// endpoint that moved, from the status it last reported to the actual one.
/// Such a change may span several transitions; its `seq` is the endpoint's
/// current sequence number.
pub struct StatusFeed {
    current: BTreeMap<String, EndpointStatus>,
    seen: HashMap<String, u64>,
    receiver: broadcast::Receiver<StatusChange>,
    cells: Weak<CellMap>,
    resynced: VecDeque<StatusChange>,
}

impl StatusFeed {
    /// Status of every endpoint as of the last change returned.
    pub fn current(&self) -> &BTreeMap<String, EndpointStatus> {
        &self.current
    }

    /// Wait for the next change. Returns `None` once the tracker is gone.
    pub async fn next(&mut self) -> Option<StatusChange> {
        loop {
            if let Some(change) = self.resynced.pop_front() {
                return Some(change);
            }
            match self.receiver.recv().await {
                Ok(change) => {
                    if let Some(change) = self.accept(change) {
                        return Some(change);
                    }
                }
                Err(RecvError::Lagged(n)) => self.resync(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next buffered change without waiting.
    pub fn try_next(&mut self) -> Option<StatusChange> {
        loop {
            if let Some(change) = self.resynced.pop_front() {
                return Some(change);
            }
            match self.receiver.try_recv() {
                Ok(change) => {
                    if let Some(change) = self.accept(change) {
                        return Some(change);
                    }
                }
                Err(TryRecvError::Lagged(n)) => self.resync(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Catch up from the tracker after the channel dropped `skipped` changes.
    fn resync(&mut self, skipped: u64) {
        counter!("relay_status_feed_resyncs_total").increment(1);
        tracing::warn!("Status feed lagged by {} changes, resyncing", skipped);

        let Some(cells) = self.cells.upgrade() else {
            return;
        };
        for (url, (status, seq)) in snapshot(&cells) {
            let seen = self.seen.entry(url.clone()).or_insert(0);
            if seq <= *seen {
                continue;
            }
            *seen = seq;
            let from = self
                .current
                .insert(url.clone(), status.clone())
                .unwrap_or_default();
            if from != status {
                self.resynced.push_back(StatusChange {
                    url,
                    from,
                    to: status,
                    seq,
                });
            }
        }
    }

    fn accept(&mut self, change: StatusChange) -> Option<StatusChange> {
        let seen = self.seen.entry(change.url.clone()).or_insert(0);
        if change.seq <= *seen {
            return None;
        }
        *seen = change.seq;
        self.current.insert(change.url.clone(), change.to.clone());
        Some(change)
    }
}
