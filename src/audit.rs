//! Audit side-files written next to the catalog.
//!
//! - **Private-ID map** (`privateid_mapping.json`): one entry per private or
//!   internal repository, keyed by `privateID` (`<platform>_<repoId>`).
//!   Name, organization, URL and contact emails follow the latest merge;
//!   `dateAdded` is set once.
//! - **Exemption log** (`exempted_log.json`): one entry per repository whose
//!   `permissions.usageType` starts with `exempt`. Entries are never
//!   rewritten once logged.
//!
//! Both files are replaced atomically. Before a merge overwrites them the
//! previous version is copied by [`backup_file`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use codejson_harvester_core::models::RepositoryRecord;

use crate::cache::write_atomic;

/// Copy `path` to `<stem>_<YYYYmmdd_HHMMSS>[_<n>].<ext>` in the same
/// directory. Returns `None` when there is nothing to back up.
pub fn backup_file(path: &Path, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = now.format("%Y%m%d_%H%M%S");

    let mut backup = dir.join(format!("{}_{}{}", stem, stamp, ext));
    let mut n = 1;
    while backup.exists() {
        backup = dir.join(format!("{}_{}_{}{}", stem, stamp, n, ext));
        n += 1;
    }
    std::fs::copy(path, &backup).with_context(|| {
        format!("Failed to back up {} to {}", path.display(), backup.display())
    })?;
    tracing::info!(file = %path.display(), backup = %backup.display(), "backed up side-file");
    Ok(Some(backup))
}

/// Organization to report for a record: the analyzer's inference when
/// present, otherwise the scan target name.
pub fn effective_organization(record: &RepositoryRecord) -> &str {
    record
        .analysis
        .get("organization")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.organization)
}

fn repository_url(record: &RepositoryRecord) -> Option<String> {
    record
        .analysis
        .get("repositoryURL")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn contact_emails(record: &RepositoryRecord) -> Vec<String> {
    let mut emails: Vec<String> = record
        .analysis
        .get("contact")
        .and_then(|c| c.get("emails"))
        .and_then(|e| e.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    emails.sort();
    emails.dedup();
    emails
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path, what: &str) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "cannot read {}, starting empty", what);
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "malformed {}, starting empty", what);
            T::default()
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

// ═══════════════════════════════════════════════════════════════════════
// Private-ID map
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateIdEntry {
    pub repository_name: String,
    #[serde(rename = "repositoryURL", default)]
    pub repository_url: Option<String>,
    pub organization: String,
    #[serde(default)]
    pub contact_emails: Vec<String>,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateIdMap {
    entries: BTreeMap<String, PrivateIdEntry>,
}

impl PrivateIdMap {
    /// Load the map; a missing or malformed file starts empty.
    pub fn load(path: &Path) -> Self {
        read_json(path, "private-ID map")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn get(&self, private_id: &str) -> Option<&PrivateIdEntry> {
        self.entries.get(private_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add or refresh the entry for a private/internal record. Returns true
    /// when the entry is new. Public records are ignored.
    pub fn upsert(&mut self, record: &RepositoryRecord, now: DateTime<Utc>) -> bool {
        let Some(private_id) = record.private_id() else {
            return false;
        };
        let organization = effective_organization(record).to_string();
        let url = repository_url(record);
        let emails = contact_emails(record);

        match self.entries.get_mut(&private_id) {
            Some(entry) => {
                entry.repository_name = record.name.clone();
                entry.organization = organization;
                if url.is_some() {
                    entry.repository_url = url;
                }
                // degraded records carry no analysis; keep what we knew
                if !record.is_degraded() {
                    entry.contact_emails = emails;
                }
                false
            }
            None => {
                self.entries.insert(
                    private_id,
                    PrivateIdEntry {
                        repository_name: record.name.clone(),
                        repository_url: url,
                        organization,
                        contact_emails: emails,
                        date_added: now,
                    },
                );
                true
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Exemption log
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionEntry {
    #[serde(rename = "privateID")]
    pub private_id: String,
    pub repository_name: String,
    pub usage_type: String,
    #[serde(default)]
    pub exemption_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExemptionLog {
    entries: Vec<ExemptionEntry>,
}

impl ExemptionLog {
    pub fn load(path: &Path) -> Self {
        read_json(path, "exemption log")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn entries(&self) -> &[ExemptionEntry] {
        &self.entries
    }

    /// Log `record` if it is exempt and not logged yet. Returns true when a
    /// new entry was added.
    pub fn log(&mut self, record: &RepositoryRecord, now: DateTime<Utc>) -> bool {
        let Some(permissions) = record.analysis.get("permissions") else {
            return false;
        };
        let Some(usage_type) = permissions.get("usageType").and_then(|v| v.as_str()) else {
            return false;
        };
        if !usage_type.to_ascii_lowercase().starts_with("exempt") {
            return false;
        }

        let key = record.private_id().unwrap_or_else(|| {
            format!("Public-{}-{}", effective_organization(record), record.name)
        });
        if self.entries.iter().any(|e| e.private_id == key) {
            return false;
        }
        self.entries.push(ExemptionEntry {
            private_id: key,
            repository_name: record.name.clone(),
            usage_type: usage_type.to_string(),
            exemption_text: permissions
                .get("exemptionText")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            timestamp: now,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use codejson_harvester_core::models::{Platform, RepositoryIdentity, Visibility};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, visibility: Visibility, analysis: serde_json::Value) -> RepositoryRecord {
        RepositoryRecord {
            identity: RepositoryIdentity::new(Platform::Gitlab, id),
            name: format!("repo-{}", id),
            organization: "cdc/ncird".to_string(),
            last_commit_sha: Some("abc".into()),
            is_empty: false,
            labor_hours: 12.5,
            visibility,
            harvested_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            analysis: analysis.as_object().cloned().unwrap_or_default(),
            processing_error: None,
        }
    }

    #[test]
    fn backup_names_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("exempted_log.json");
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert!(backup_file(&path, now).unwrap().is_none());

        std::fs::write(&path, "[]").unwrap();
        let first = backup_file(&path, now).unwrap().unwrap();
        let second = backup_file(&path, now).unwrap().unwrap();
        assert_eq!(first.file_name().unwrap(), "exempted_log_20260304_050607.json");
        assert_eq!(second.file_name().unwrap(), "exempted_log_20260304_050607_1.json");
        assert!(path.exists());
    }

    #[test]
    fn private_id_map_keeps_date_added() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mut map = PrivateIdMap::default();

        let r = record(
            "7",
            Visibility::Private,
            json!({"contact": {"emails": ["B@cdc.gov", "a@cdc.gov", "b@cdc.gov"]}}),
        );
        assert!(map.upsert(&r, t0));
        assert!(!map.upsert(&r, t1));
        assert!(!map.upsert(&record("8", Visibility::Public, json!({})), t1));

        let entry = map.get("gitlab_7").unwrap();
        assert_eq!(entry.date_added, t0);
        assert_eq!(entry.contact_emails, vec!["a@cdc.gov", "b@cdc.gov"]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn exemption_log_is_append_only() {
        let now = Utc::now();
        let mut log = ExemptionLog::default();
        let exempt = record(
            "1",
            Visibility::Internal,
            json!({"permissions": {"usageType": "exemptByLaw", "exemptionText": "PII"}}),
        );
        let public_exempt = record(
            "2",
            Visibility::Public,
            json!({"organization": "NCHS", "permissions": {"usageType": "ExemptNonCode"}}),
        );
        let open = record("3", Visibility::Public, json!({"permissions": {"usageType": "openSource"}}));

        assert!(log.log(&exempt, now));
        assert!(!log.log(&exempt, now));
        assert!(log.log(&public_exempt, now));
        assert!(!log.log(&open, now));

        let keys: Vec<&str> = log.entries().iter().map(|e| e.private_id.as_str()).collect();
        assert_eq!(keys, vec!["gitlab_1", "Public-NCHS-repo-2"]);
        assert_eq!(log.entries()[0].exemption_text.as_deref(), Some("PII"));
    }

    #[test]
    fn side_files_round_trip_and_tolerate_garbage() {
        let tmp = TempDir::new().unwrap();
        let map_path = tmp.path().join("privateid_mapping.json");
        std::fs::write(&map_path, "not json").unwrap();
        let mut map = PrivateIdMap::load(&map_path);
        assert!(map.is_empty());

        map.upsert(&record("9", Visibility::Private, json!({})), Utc::now());
        map.save(&map_path).unwrap();
        assert_eq!(PrivateIdMap::load(&map_path), map);
    }
}
