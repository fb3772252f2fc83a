//! Republishing the latest relay-list record to stale endpoints.
//!
//! The payload is the authoritative record's raw signed event, sent verbatim;
//! nothing is re-signed. Callers should only offer this when the chosen record
//! belongs to the latest group of a [`Reconciliation`](super::Reconciliation).
//! Publishing an older version is not prevented here, but relays that already
//! hold a newer replaceable event will ignore it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use outbox_core::VersionedRecord;

use crate::error::TransportError;
use crate::transport::RelayTransport;

/// Publishes an existing signed record to a set of endpoints.
pub struct Republisher {
    transport: Arc<dyn RelayTransport>,
    timeout: Duration,
}

impl Republisher {
    pub fn new(transport: Arc<dyn RelayTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Publish `authoritative` to every endpoint in `stale`, concurrently.
    ///
    /// Returns per-endpoint success. Every endpoint appears in the result.
    pub async fn update_outdated<S: AsRef<str>>(
        &self,
        authoritative: &VersionedRecord,
        stale: &[S],
    ) -> BTreeMap<String, bool> {
        self.update_outdated_detailed(authoritative, stale)
            .await
            .into_iter()
            .map(|(url, result)| (url, result.is_ok()))
            .collect()
    }

    /// Like [`update_outdated`](Self::update_outdated), keeping the failure
    /// reason per endpoint.
    pub async fn update_outdated_detailed<S: AsRef<str>>(
        &self,
        authoritative: &VersionedRecord,
        stale: &[S],
    ) -> BTreeMap<String, Result<(), TransportError>> {
        let event = match authoritative.event() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Cannot republish record from {}: {}", authoritative.source, e);
                let reason = TransportError::Publish(format!("unreadable payload: {}", e));
                return stale
                    .iter()
                    .map(|url| (url.as_ref().to_string(), Err(reason.clone())))
                    .collect();
            }
        };

        let attempts = stale.iter().map(|url| {
            let url = url.as_ref();
            let event = &event;
            async move {
                let publish = self.transport.publish(url, event, self.timeout);
                let result = tokio::time::timeout(self.timeout, publish)
                    .await
                    .unwrap_or(Err(TransportError::Timeout));
                self.transport.close(url).await;
                (url.to_string(), result)
            }
        });
        let results: BTreeMap<_, _> = join_all(attempts).await.into_iter().collect();

        let mut published = 0;
        for (url, result) in &results {
            match result {
                Ok(()) => {
                    published += 1;
                    counter!("republish_attempts_total", "result" => "ok").increment(1);
                }
                Err(e) => {
                    counter!("republish_attempts_total", "result" => "failed").increment(1);
                    tracing::warn!("Republish to {} failed: {}", url, e);
                }
            }
        }
        tracing::info!(
            "Republished version {} to {}/{} endpoints",
            authoritative.version,
            published,
            results.len()
        );

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, PublishScript, relay_list_event};
    use nostr_sdk::Keys;

    fn authoritative(keys: &Keys) -> VersionedRecord {
        let event = relay_list_event(keys, 1_700_000_000, &["wss://home.example.com"]);
        VersionedRecord::from_event(&event, &keys.public_key(), "wss://src.example.com").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_outdated_records_every_endpoint() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on_publish("wss://b.example.com", PublishScript::Reject("blocked".to_string()))
            .on_publish("wss://c.example.com", PublishScript::Hang);
        let republisher = Republisher::new(transport.clone(), Duration::from_secs(5));

        let keys = Keys::generate();
        let record = authoritative(&keys);
        let stale = ["wss://a.example.com", "wss://b.example.com", "wss://c.example.com"];

        let results = republisher.update_outdated(&record, &stale).await;
        assert_eq!(results.len(), 3);
        assert!(results["wss://a.example.com"]);
        assert!(!results["wss://b.example.com"]);
        assert!(!results["wss://c.example.com"]);

        let event_id = record.event().unwrap().id.to_hex();
        assert_eq!(
            transport.published(),
            vec![("wss://a.example.com".to_string(), event_id)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_links_are_closed() {
        let transport = Arc::new(MockTransport::new());
        transport.on_publish("wss://b.example.com", PublishScript::Hang);
        transport
            .connect("wss://kept.example.com", Duration::from_secs(1))
            .await
            .unwrap();
        let republisher = Republisher::new(transport.clone(), Duration::from_secs(5));

        let stale = ["wss://a.example.com", "wss://b.example.com", "wss://kept.example.com"];
        republisher
            .update_outdated(&authoritative(&Keys::generate()), &stale)
            .await;

        assert_eq!(transport.open_links(), vec!["wss://kept.example.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detailed_reasons() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on_publish("wss://b.example.com", PublishScript::Reject("rate limited".to_string()))
            .on_publish("wss://c.example.com", PublishScript::Hang);
        let republisher = Republisher::new(transport, Duration::from_secs(5));

        let record = authoritative(&Keys::generate());
        let results = republisher
            .update_outdated_detailed(&record, &["wss://b.example.com", "wss://c.example.com"])
            .await;

        assert_eq!(
            results["wss://b.example.com"],
            Err(TransportError::Publish("rate limited".to_string()))
        );
        assert_eq!(results["wss://c.example.com"], Err(TransportError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_concurrently() {
        let transport = Arc::new(MockTransport::new());
        for i in 0..4 {
            transport.on_publish(&format!("wss://r{}.example.com", i), PublishScript::Hang);
        }
        let republisher = Republisher::new(transport, Duration::from_secs(5));
        let stale: Vec<String> = (0..4).map(|i| format!("wss://r{}.example.com", i)).collect();

        let started = tokio::time::Instant::now();
        let results = republisher
            .update_outdated(&authoritative(&Keys::generate()), &stale)
            .await;

        assert!(results.values().all(|ok| !ok));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_unreadable_payload_fails_every_endpoint() {
        let republisher = Republisher::new(Arc::new(MockTransport::new()), Duration::from_secs(5));
        let mut record = authoritative(&Keys::generate());
        record.raw = "not json".to_string();

        let results = republisher
            .update_outdated_detailed(&record, &["wss://a.example.com"])
            .await;
        assert!(matches!(
            results["wss://a.example.com"],
            Err(TransportError::Publish(_))
        ));
    }
}
