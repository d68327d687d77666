//! Merge engine: intermediate snapshots → final catalog.
//!
//! ```text
//! intermediate_*.json ─▶ merge_snapshots (dedup by identity, newest scan wins)
//!                     ─▶ code.json                (atomic)
//!                     ─▶ privateid_mapping.json   (backup, then atomic)
//!                     ─▶ exempted_log.json        (backup, then atomic)
//! ```
//!
//! The catalog holds only data taken from the records, so merging the same
//! snapshots twice produces byte-identical output.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use codejson_harvester_core::merge::merge_snapshots;
use codejson_harvester_core::models::RepositoryRecord;
use codejson_harvester_core::store::SnapshotStore;

use crate::audit::{backup_file, effective_organization, ExemptionLog, PrivateIdMap};
use crate::cache::write_atomic;
use crate::config::OutputConfig;

pub const CATALOG_VERSION: &str = "2.0";

/// Final catalog document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub agency: String,
    pub version: String,
    pub measurement_type: Value,
    pub releases: Vec<Value>,
}

/// What a merge did.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub snapshots: usize,
    pub releases: usize,
    pub conflicts_dropped: usize,
    pub degraded: usize,
    pub new_private_ids: usize,
    pub new_exemptions: usize,
    pub backups: Vec<PathBuf>,
    pub catalog_path: PathBuf,
}

/// One catalog release. Analysis fields come first; the harvester's own
/// fields overwrite any key of the same name.
pub fn release(record: &RepositoryRecord) -> Value {
    let mut out: Map<String, Value> = record.analysis.clone();
    out.insert("name".into(), json!(record.name));
    out.insert("organization".into(), json!(effective_organization(record)));
    out.insert("platform".into(), json!(record.identity.platform));
    out.insert("repoId".into(), json!(record.identity.repo_id));
    out.insert("lastCommitSHA".into(), json!(record.last_commit_sha));
    out.insert("isEmpty".into(), json!(record.is_empty));
    out.insert("laborHours".into(), json!(record.labor_hours));
    out.insert("repositoryVisibility".into(), json!(record.visibility));
    out.insert(
        "date".into(),
        json!({ "metadataLastUpdated": record.harvested_at }),
    );
    if let Some(private_id) = record.private_id() {
        out.insert("privateID".into(), json!(private_id));
    }
    if let Some(err) = &record.processing_error {
        out.insert("processingError".into(), json!(err));
    }
    Value::Object(out)
}

pub fn build_catalog(agency: &str, records: &[RepositoryRecord]) -> Catalog {
    Catalog {
        agency: agency.to_string(),
        version: CATALOG_VERSION.to_string(),
        measurement_type: json!({ "method": "projects" }),
        releases: records.iter().map(release).collect(),
    }
}

/// Read every snapshot from `store`, write the catalog and the side-files.
pub async fn run_merge(output: &OutputConfig, store: &dyn SnapshotStore) -> Result<MergeReport> {
    let snapshots = store.read_all().await?;
    if snapshots.is_empty() {
        tracing::warn!(dir = %output.dir.display(), "no snapshots found, catalog will be empty");
    }

    let outcome = merge_snapshots(snapshots);
    for conflict in &outcome.conflicts {
        tracing::debug!(
            repo = %conflict.identity,
            kept = %conflict.kept_from,
            dropped = %conflict.dropped_from,
            "duplicate repository dropped"
        );
    }
    if outcome.conflicts_dropped() > 0 {
        tracing::info!(dropped = outcome.conflicts_dropped(), "resolved duplicate repositories");
    }

    let catalog = build_catalog(&output.agency, &outcome.records);
    let catalog_path = output.catalog_path();
    let mut bytes = serde_json::to_vec_pretty(&catalog)?;
    bytes.push(b'\n');
    write_atomic(&catalog_path, &bytes)?;

    let now = Utc::now();
    let map_path = output.private_id_map_path();
    let log_path = output.exemption_log_path();
    let mut backups = Vec::new();
    backups.extend(backup_file(&map_path, now)?);
    backups.extend(backup_file(&log_path, now)?);

    let mut private_ids = PrivateIdMap::load(&map_path);
    let mut exemptions = ExemptionLog::load(&log_path);
    let mut new_private_ids = 0;
    let mut new_exemptions = 0;
    for record in &outcome.records {
        if private_ids.upsert(record, now) {
            new_private_ids += 1;
        }
        if exemptions.log(record, now) {
            new_exemptions += 1;
        }
    }
    private_ids.save(&map_path)?;
    exemptions.save(&log_path)?;

    let degraded = outcome.records.iter().filter(|r| r.is_degraded()).count();
    tracing::info!(
        snapshots = outcome.snapshots_merged,
        releases = outcome.records.len(),
        degraded,
        new_private_ids,
        new_exemptions,
        catalog = %catalog_path.display(),
        "merge finished"
    );

    Ok(MergeReport {
        snapshots: outcome.snapshots_merged,
        releases: outcome.records.len(),
        conflicts_dropped: outcome.conflicts_dropped(),
        degraded,
        new_private_ids,
        new_exemptions,
        backups,
        catalog_path,
    })
}

pub fn print_report(report: &MergeReport) {
    println!("merge");
    println!("  snapshots: {}", report.snapshots);
    println!("  releases: {}", report.releases);
    println!("  duplicates dropped: {}", report.conflicts_dropped);
    println!("  degraded: {}", report.degraded);
    println!("  new private IDs: {}", report.new_private_ids);
    println!("  new exemptions: {}", report.new_exemptions);
    for backup in &report.backups {
        println!("  backup: {}", backup.display());
    }
    println!("  catalog: {}", report.catalog_path.display());
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use codejson_harvester_core::models::{Platform, RepositoryIdentity, Visibility};

    #[test]
    fn release_keeps_core_fields_over_analysis() {
        let record = RepositoryRecord {
            identity: RepositoryIdentity::new(Platform::Azure, "g-1"),
            name: "survey".into(),
            organization: "cdc/ncezid".into(),
            last_commit_sha: None,
            is_empty: true,
            labor_hours: 0.0,
            visibility: Visibility::Internal,
            harvested_at: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
            analysis: json!({"name": "spoofed", "tags": ["etl"]})
                .as_object()
                .cloned()
                .unwrap(),
            processing_error: None,
        };
        let r = release(&record);
        assert_eq!(r["name"], "survey");
        assert_eq!(r["tags"][0], "etl");
        assert_eq!(r["privateID"], "azure_g-1");
        assert_eq!(r["repositoryVisibility"], "internal");
        assert_eq!(r["organization"], "cdc/ncezid");
        assert!(r.get("processingError").is_none());
    }
}
