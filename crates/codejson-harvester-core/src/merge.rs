//! Deduplicating merge of intermediate snapshots.
//!
//! # Conflict policy
//!
//! 1. Order snapshots by `(scannedAt, platform, target name)` ascending.
//! 2. Fold their records into a map keyed by [`RepositoryIdentity`]; a later
//!    snapshot overwrites an earlier one.
//! 3. Every overwritten record is counted in `conflicts_dropped`.
//! 4. Emit records sorted by identity.
//!
//! The newest scan wins. Snapshots scanned at the same instant fall back to
//! platform then target name, so the result never depends on the order in
//! which snapshots were read from disk.

use std::collections::BTreeMap;

use crate::models::{IntermediateSnapshot, RepositoryIdentity, RepositoryRecord};

/// A dropped duplicate, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub identity: RepositoryIdentity,
    /// Target label of the snapshot whose record was kept.
    pub kept_from: String,
    /// Target label of the snapshot whose record was dropped.
    pub dropped_from: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<RepositoryRecord>,
    pub conflicts: Vec<MergeConflict>,
    pub snapshots_merged: usize,
}

impl MergeOutcome {
    pub fn conflicts_dropped(&self) -> usize {
        self.conflicts.len()
    }
}

pub fn merge_snapshots(mut snapshots: Vec<IntermediateSnapshot>) -> MergeOutcome {
    snapshots.sort_by(|a, b| {
        a.scanned_at
            .cmp(&b.scanned_at)
            .then_with(|| a.target.platform.cmp(&b.target.platform))
            .then_with(|| a.target.name.cmp(&b.target.name))
    });

    let snapshots_merged = snapshots.len();
    let mut merged: BTreeMap<RepositoryIdentity, (String, RepositoryRecord)> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for snapshot in snapshots {
        let label = snapshot.target.label();
        for record in snapshot.records {
            let identity = record.identity.clone();
            if let Some((previous, _)) = merged.insert(identity.clone(), (label.clone(), record)) {
                conflicts.push(MergeConflict {
                    identity,
                    kept_from: label.clone(),
                    dropped_from: previous,
                });
            }
        }
    }

    MergeOutcome {
        records: merged.into_values().map(|(_, r)| r).collect(),
        conflicts,
        snapshots_merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, RepositorySummary, ScanTarget, Visibility};
    use chrono::{DateTime, TimeZone, Utc};

    fn rec(id: &str, org: &str, sha: &str) -> RepositoryRecord {
        let summary = RepositorySummary {
            identity: RepositoryIdentity::new(Platform::Github, id),
            name: format!("repo-{}", id),
            last_commit_sha: Some(sha.to_string()),
            is_empty: false,
            is_fork: false,
            visibility: Visibility::Public,
            created_at: None,
            pushed_at: None,
        };
        RepositoryRecord::degraded(&summary, org, "n/a", ts(0))
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn snap(org: &str, at: DateTime<Utc>, records: Vec<RepositoryRecord>) -> IntermediateSnapshot {
        IntermediateSnapshot::new(ScanTarget::new(Platform::Github, org), "s", at, records)
    }

    #[test]
    fn newer_snapshot_wins() {
        let old = snap("a", ts(1), vec![rec("1", "a", "old"), rec("2", "a", "x")]);
        let new = snap("b", ts(5), vec![rec("1", "b", "new")]);
        let out = merge_snapshots(vec![new, old]);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].organization, "b");
        assert_eq!(out.records[0].last_commit_sha.as_deref(), Some("new"));
        assert_eq!(out.conflicts_dropped(), 1);
        assert_eq!(out.conflicts[0].dropped_from, "github:a");
    }

    #[test]
    fn ties_broken_by_target_name() {
        let a = snap("alpha", ts(2), vec![rec("9", "alpha", "1")]);
        let z = snap("zeta", ts(2), vec![rec("9", "zeta", "2")]);
        let forward = merge_snapshots(vec![a.clone(), z.clone()]);
        let backward = merge_snapshots(vec![z, a]);
        assert_eq!(forward.records, backward.records);
        assert_eq!(forward.records[0].organization, "zeta");
    }

    #[test]
    fn output_unique_and_sorted() {
        let s1 = snap("a", ts(1), vec![rec("3", "a", "x"), rec("1", "a", "x")]);
        let s2 = snap("b", ts(2), vec![rec("2", "b", "x"), rec("3", "b", "y")]);
        let out = merge_snapshots(vec![s1, s2]);
        let ids: Vec<&str> = out.records.iter().map(|r| r.identity.repo_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(out.snapshots_merged, 2);
    }

    #[test]
    fn empty_input() {
        let out = merge_snapshots(Vec::new());
        assert!(out.records.is_empty());
        assert_eq!(out.conflicts_dropped(), 0);
    }
}
