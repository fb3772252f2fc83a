//! NIP-65 relay-list records.
//!
//! A relay-list record is a kind 10002 event whose `r` tags name the relays an
//! identity reads from and writes to. Each endpoint may hold a different copy;
//! the record's `created_at` is its version.

use std::collections::{BTreeMap, BTreeSet};

use nostr::{Event, JsonUtil, PublicKey};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::url::normalize_relay_url;
use crate::{NOSTR_GENESIS_TIMESTAMP, RELAY_LIST_KIND};

/// Read/write markers for a relay named in a relay-list record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayUsage {
    pub read: bool,
    pub write: bool,
}

impl RelayUsage {
    /// Usage for a tag marker. No marker means both directions.
    fn from_marker(marker: Option<&str>) -> Option<Self> {
        match marker {
            None | Some("") => Some(Self {
                read: true,
                write: true,
            }),
            Some("read") => Some(Self {
                read: true,
                write: false,
            }),
            Some("write") => Some(Self {
                read: false,
                write: true,
            }),
            Some(_) => None,
        }
    }

    fn merge(&mut self, other: Self) {
        self.read |= other.read;
        self.write |= other.write;
    }
}

/// Extract relays and their usage from the `r` tags of an event.
///
/// URLs are normalized; invalid or blocked URLs and unknown markers are
/// skipped. Duplicates are merged by taking the union of their markers.
pub fn parse_relay_tags(event: &Event) -> BTreeMap<String, RelayUsage> {
    let mut relays: BTreeMap<String, RelayUsage> = BTreeMap::new();

    for tag in event.tags.iter() {
        let tag_vec: Vec<&str> = tag.as_slice().iter().map(|s| s.as_str()).collect();

        if tag_vec.first() != Some(&"r") || tag_vec.len() < 2 {
            continue;
        }

        let Some(url) = normalize_relay_url(tag_vec[1]).ok() else {
            tracing::trace!("Skipping unusable relay URL in relay list: {}", tag_vec[1]);
            continue;
        };

        let Some(usage) = RelayUsage::from_marker(tag_vec.get(2).copied()) else {
            continue;
        };

        relays.entry(url).or_default().merge(usage);
    }

    relays
}

/// One endpoint's copy of an identity's relay-list record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedRecord {
    /// Authoring timestamp (`created_at`), used as the version.
    pub version: u64,
    /// Relays the identity publishes to, sorted.
    pub write_relays: Vec<String>,
    /// Relays the identity reads from, sorted.
    pub read_relays: Vec<String>,
    /// Endpoint this copy was fetched from.
    pub source: String,
    /// Hex public key of the author.
    pub author: String,
    /// Canonical JSON of the signed event, republished verbatim.
    #[serde(skip)]
    pub raw: String,
}

impl VersionedRecord {
    /// Validate an event as `author`'s relay-list record and wrap it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The kind is not 10002
    /// - The event was not authored by `author`
    /// - The event ID or signature does not verify
    /// - `created_at` predates the Nostr genesis date
    pub fn from_event(event: &Event, author: &PublicKey, source: &str) -> Result<Self> {
        let kind = event.kind.as_u16();
        if kind != RELAY_LIST_KIND {
            return Err(Error::UnexpectedKind {
                expected: RELAY_LIST_KIND,
                found: kind,
            });
        }

        if event.pubkey != *author {
            return Err(Error::AuthorMismatch {
                expected: author.to_hex(),
                found: event.pubkey.to_hex(),
            });
        }

        if !event.verify_id() {
            return Err(Error::InvalidEventId(event.id.to_hex()));
        }
        if !event.verify_signature() {
            return Err(Error::InvalidSignature(
                "signature verification failed".to_string(),
            ));
        }

        let version = event.created_at.as_u64();
        if version < NOSTR_GENESIS_TIMESTAMP {
            return Err(Error::InvalidField {
                field: "created_at",
                reason: format!("{} predates the Nostr genesis date", version),
            });
        }

        let relays = parse_relay_tags(event);

        Ok(Self {
            version,
            write_relays: relays
                .iter()
                .filter(|(_, usage)| usage.write)
                .map(|(url, _)| url.clone())
                .collect(),
            read_relays: relays
                .iter()
                .filter(|(_, usage)| usage.read)
                .map(|(url, _)| url.clone())
                .collect(),
            source: source.to_string(),
            author: event.pubkey.to_hex(),
            raw: event.as_json(),
        })
    }

    /// Parse and validate a relay-list record from event JSON.
    pub fn from_json(json: &str, author: &PublicKey, source: &str) -> Result<Self> {
        let event = Event::from_json(json)?;
        Self::from_event(&event, author, source)
    }

    /// Reconstruct the signed event from the raw payload.
    pub fn event(&self) -> Result<Event> {
        Ok(Event::from_json(&self.raw)?)
    }

    /// All relays named by the record, regardless of direction.
    pub fn relays(&self) -> BTreeSet<&str> {
        self.write_relays
            .iter()
            .chain(self.read_relays.iter())
            .map(String::as_str)
            .collect()
    }
}
