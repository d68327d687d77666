//! Snapshot statistics and catalog overview.
//!
//! Summarizes what the last scans left on disk: per-target record counts,
//! degraded and empty repositories, labor hours and scan age, plus a SHA-256
//! fingerprint of the current catalog. Used by `harvest stats` to check that
//! a scan produced what was expected before publishing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

use codejson_harvester_core::models::IntermediateSnapshot;

use crate::cache::FileSnapshotStore;
use crate::config::Config;
use crate::progress::format_number;
use codejson_harvester_core::store::SnapshotStore;

/// Per-snapshot breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStats {
    pub target: String,
    pub records: usize,
    pub degraded: usize,
    pub empty: usize,
    pub private: usize,
    pub labor_hours: f64,
    pub scanned_at: DateTime<Utc>,
}

impl SnapshotStats {
    pub fn from_snapshot(snapshot: &IntermediateSnapshot) -> Self {
        let records = &snapshot.records;
        Self {
            target: snapshot.target.label(),
            records: records.len(),
            degraded: snapshot.degraded_count(),
            empty: records.iter().filter(|r| r.is_empty).count(),
            private: records.iter().filter(|r| !r.visibility.is_public()).count(),
            labor_hours: records.iter().map(|r| r.labor_hours).sum(),
            scanned_at: snapshot.scanned_at,
        }
    }
}

/// Hex SHA-256 of the catalog file, if it exists.
pub fn catalog_fingerprint(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(hex::encode(Sha256::digest(&bytes)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run the stats command: read snapshots and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = FileSnapshotStore::new(&config.output.dir);
    let snapshots = store.read_all().await?;
    let stats: Vec<SnapshotStats> = snapshots.iter().map(SnapshotStats::from_snapshot).collect();

    let total_records: usize = stats.iter().map(|s| s.records).sum();
    let total_degraded: usize = stats.iter().map(|s| s.degraded).sum();
    let total_hours: f64 = stats.iter().map(|s| s.labor_hours).sum();

    println!("codejson-harvester: Snapshot Stats");
    println!("===================================");
    println!();
    println!("  Output dir:  {}", config.output.dir.display());
    println!("  Snapshots:   {}", stats.len());
    println!("  Records:     {}", format_number(total_records as u64));
    println!("  Degraded:    {}", format_number(total_degraded as u64));
    println!("  Labor hours: {:.1}", total_hours);

    let catalog = config.output.catalog_path();
    match catalog_fingerprint(&catalog)? {
        Some(fp) => println!("  Catalog:     {} (sha256 {})", catalog.display(), &fp[..16]),
        None => println!("  Catalog:     not written yet"),
    }

    if !stats.is_empty() {
        println!();
        println!("  By target:");
        println!(
            "  {:<32} {:>7} {:>8} {:>6} {:>8} {:>10}   {}",
            "TARGET", "REPOS", "DEGRADED", "EMPTY", "PRIVATE", "HOURS", "SCANNED"
        );
        println!("  {}", "-".repeat(96));
        for s in &stats {
            println!(
                "  {:<32} {:>7} {:>8} {:>6} {:>8} {:>10.1}   {}",
                s.target,
                s.records,
                s.degraded,
                s.empty,
                s.private,
                s.labor_hours,
                format_ts_relative(s.scanned_at.timestamp())
            );
        }
    }

    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejson_harvester_core::models::{
        Platform, RepositoryIdentity, RepositoryRecord, ScanTarget, Visibility,
    };
    use tempfile::TempDir;

    #[test]
    fn counts_by_kind() {
        let now = Utc::now();
        let rec = |id: &str, visibility, is_empty, hours, err: Option<&str>| RepositoryRecord {
            identity: RepositoryIdentity::new(Platform::Github, id),
            name: id.to_string(),
            organization: "org".into(),
            last_commit_sha: None,
            is_empty,
            labor_hours: hours,
            visibility,
            harvested_at: now,
            analysis: Default::default(),
            processing_error: err.map(|s| s.to_string()),
        };
        let snap = IntermediateSnapshot::new(
            ScanTarget::new(Platform::Github, "org"),
            "s",
            now,
            vec![
                rec("1", Visibility::Public, false, 10.0, None),
                rec("2", Visibility::Private, true, 0.0, None),
                rec("3", Visibility::Internal, false, 2.5, Some("boom")),
            ],
        );
        let s = SnapshotStats::from_snapshot(&snap);
        assert_eq!((s.records, s.degraded, s.empty, s.private), (3, 1, 1, 2));
        assert_eq!(s.labor_hours, 12.5);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("code.json");
        assert!(catalog_fingerprint(&path).unwrap().is_none());
        std::fs::write(&path, "{}").unwrap();
        let a = catalog_fingerprint(&path).unwrap().unwrap();
        assert_eq!(a.len(), 64);
        std::fs::write(&path, "{ }").unwrap();
        assert_ne!(catalog_fingerprint(&path).unwrap().unwrap(), a);
    }

    #[test]
    fn relative_time() {
        let now = Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
