//! Reconciliation of divergent relay-list copies.
//!
//! Records are grouped by version (their `created_at`). The group with the
//! highest version is the latest; every other group carries a diff against
//! it and may be flagged as an outlier when it looks like a single stale
//! endpoint rather than a genuine split.
//!
//! This is a pure function of its input: reconciling the same records in any
//! order yields identical groups, selection, and diffs.

use std::collections::{BTreeMap, BTreeSet};

use outbox_core::VersionedRecord;
use serde::Serialize;

use super::session::{QueryState, QueryStatus};

/// Thresholds for flagging a non-latest group as an outlier.
///
/// A group is an outlier when the latest group has at least
/// `min_latest_support` endpoints and the group has at most
/// `max_outlier_support`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlierPolicy {
    pub min_latest_support: usize,
    pub max_outlier_support: usize,
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self {
            min_latest_support: 2,
            max_outlier_support: 1,
        }
    }
}

impl OutlierPolicy {
    pub fn is_outlier(&self, latest_support: usize, group_support: usize) -> bool {
        latest_support >= self.min_latest_support && group_support <= self.max_outlier_support
    }
}

/// Relay URLs gained and lost relative to the latest record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayDiff {
    /// In the latest record but not in this group's.
    pub added: Vec<String>,
    /// In this group's record but not in the latest.
    pub removed: Vec<String>,
}

impl RelayDiff {
    fn between(latest: &BTreeSet<&str>, group: &BTreeSet<&str>) -> Self {
        Self {
            added: latest.difference(group).map(|s| s.to_string()).collect(),
            removed: group.difference(latest).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff of a group against the latest group, overall and per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupDiff {
    pub relays: RelayDiff,
    pub write: RelayDiff,
    pub read: RelayDiff,
}

impl GroupDiff {
    fn between(latest: &VersionedRecord, group: &VersionedRecord) -> Self {
        fn set(urls: &[String]) -> BTreeSet<&str> {
            urls.iter().map(String::as_str).collect()
        }

        Self {
            relays: RelayDiff::between(&latest.relays(), &group.relays()),
            write: RelayDiff::between(&set(&latest.write_relays), &set(&group.write_relays)),
            read: RelayDiff::between(&set(&latest.read_relays), &set(&group.read_relays)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty() && self.write.is_empty() && self.read.is_empty()
    }
}

/// All records sharing one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationGroup {
    pub version: u64,
    /// Members ordered by source URL.
    pub members: Vec<VersionedRecord>,
    pub is_latest: bool,
    pub is_outlier: bool,
    /// Diff against the latest group; empty for the latest itself.
    pub diff: GroupDiff,
}

impl ReconciliationGroup {
    /// Number of endpoints that returned this version.
    pub fn support(&self) -> usize {
        self.members.len()
    }

    /// The member used for diffs and republishing: the one with the
    /// lexicographically smallest source URL.
    pub fn representative(&self) -> &VersionedRecord {
        &self.members[0]
    }

    pub fn sources(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.source.as_str()).collect()
    }
}

/// Result of reconciling one session's successful records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Groups ordered by version, newest first.
    pub groups: Vec<ReconciliationGroup>,
}

impl Reconciliation {
    pub fn latest(&self) -> Option<&ReconciliationGroup> {
        self.groups.first()
    }

    pub fn outliers(&self) -> impl Iterator<Item = &ReconciliationGroup> {
        self.groups.iter().filter(|g| g.is_outlier)
    }

    /// Group for a specific version.
    pub fn group(&self, version: u64) -> Option<&ReconciliationGroup> {
        self.groups.iter().find(|g| g.version == version)
    }

    /// True when every endpoint agrees (zero or one group).
    pub fn is_consistent(&self) -> bool {
        self.groups.len() <= 1
    }

    /// Endpoints serving a version older than the latest, sorted.
    ///
    /// These are the candidates for republishing the latest record.
    pub fn outdated_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self
            .groups
            .iter()
            .filter(|g| !g.is_latest)
            .flat_map(|g| g.members.iter().map(|m| m.source.clone()))
            .collect();
        sources.sort();
        sources
    }

    /// Endpoints that answered without any record, sorted.
    ///
    /// Publishing the latest record there seeds it on relays that never saw it.
    pub fn missing_sources(states: &[QueryState]) -> Vec<String> {
        let mut sources: Vec<String> = states
            .iter()
            .filter(|s| s.status == QueryStatus::NoData)
            .map(|s| s.endpoint.clone())
            .collect();
        sources.sort();
        sources
    }
}

/// Group records by version, select the latest, and compute diffs.
pub fn reconcile(records: &[VersionedRecord], policy: &OutlierPolicy) -> Reconciliation {
    let mut by_version: BTreeMap<u64, Vec<VersionedRecord>> = BTreeMap::new();
    for record in records {
        by_version
            .entry(record.version)
            .or_default()
            .push(record.clone());
    }

    let mut groups: Vec<(u64, Vec<VersionedRecord>)> = by_version.into_iter().rev().collect();
    for (_, members) in &mut groups {
        members.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.raw.cmp(&b.raw)));
    }

    let Some((_, latest_members)) = groups.first() else {
        return Reconciliation::default();
    };
    let latest = latest_members[0].clone();
    let latest_support = latest_members.len();

    let groups = groups
        .into_iter()
        .enumerate()
        .map(|(i, (version, members))| {
            let is_latest = i == 0;
            let support = members.len();
            let diff = if is_latest {
                GroupDiff::default()
            } else {
                GroupDiff::between(&latest, &members[0])
            };
            ReconciliationGroup {
                version,
                is_latest,
                is_outlier: !is_latest && policy.is_outlier(latest_support, support),
                diff,
                members,
            }
        })
        .collect();

    Reconciliation { groups }
}
