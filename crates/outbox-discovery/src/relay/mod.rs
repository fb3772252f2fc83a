//! Endpoint connection state and orchestration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  - Spawns one task per connection attempt                       │
//! │  - Cancellation epoch for disconnect-all                        │
//! │  - Liveness reconciliation against the transport                │
//! └───────────────┬─────────────────────────────────────────────────┘
//!                 │ StatusEvent
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         StatusTracker                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  - One locked cell per endpoint, validated transitions          │
//! │  - O(1) connected/subscribed/total counters                     │
//! │  - StatusFeed: snapshot + ordered deltas                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use outbox_discovery::relay::{EndpointFlags, Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(transport, OrchestratorConfig::default());
//! orchestrator.add_endpoints(&["wss://relay.example.com"], EndpointFlags::default());
//!
//! let mut feed = orchestrator.subscribe_status();
//! orchestrator.connect().join().await;
//!
//! while let Some(change) = feed.next().await {
//!     println!("{}: {} -> {}", change.url, change.from, change.to);
//! }
//! ```

mod info;
mod orchestrator;
mod status;
mod tracker;

pub use info::{CapabilityFetcher, RelayCapabilities};
pub use orchestrator::{ConnectRound, Orchestrator, OrchestratorConfig, SubscribeReport};
pub use status::{EndpointStatus, StatusEvent};
pub use tracker::{
    Endpoint, EndpointFlags, StatusChange, StatusCounts, StatusFeed, StatusTracker,
};
