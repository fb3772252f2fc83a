//! Relay-list discovery: scatter-gather queries, reconciliation, and
//! republishing.
//!
//! ```ignore
//! let engine = DiscoveryEngine::new(orchestrator, DiscoveryConfig::default());
//! let report = engine.start(&pubkey, &candidates)?.wait().await;
//!
//! let reconciliation = report.reconcile(&engine.config().outliers);
//! if let Some(latest) = reconciliation.latest() {
//!     let stale = reconciliation.outdated_sources();
//!     engine
//!         .republisher()
//!         .update_outdated(latest.representative(), &stale)
//!         .await;
//! }
//! ```

mod engine;
mod reconcile;
mod republish;
mod session;

pub use engine::{DiscoveryConfig, DiscoveryEngine};
pub use reconcile::{
    GroupDiff, OutlierPolicy, Reconciliation, ReconciliationGroup, RelayDiff, reconcile,
};
pub use republish::Republisher;
pub use session::{Progress, QueryState, QueryStatus, SessionHandle, SessionReport};
