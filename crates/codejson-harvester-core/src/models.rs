//! Core data models shared by the harvester and its stores.
//!
//! These types describe what flows through a scan: the target being
//! harvested, the lightweight summaries a connector lists, the records
//! written to an intermediate snapshot, and the snapshot itself.
//!
//! Every type that is persisted serializes with camelCase field names so
//! snapshot files line up with the published `code.json` vocabulary
//! (`lastCommitSHA`, `laborHours`, `repoId`, ...).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Source-code hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
    Azure,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Github => "github",
            Platform::Gitlab => "gitlab",
            Platform::Azure => "azure",
        }
    }

    pub fn all() -> [Platform; 3] {
        [Platform::Github, Platform::Gitlab, Platform::Azure]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Platform::Github),
            "gitlab" => Ok(Platform::Gitlab),
            "azure" | "azuredevops" | "azure-devops" => Ok(Platform::Azure),
            other => anyhow::bail!(
                "Unknown platform: '{}'. Must be github, gitlab, or azure.",
                other
            ),
        }
    }
}

/// One organization, group, or project harvested as a unit.
///
/// Immutable once a run starts. Owns its own intermediate snapshot and
/// its own delay state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTarget {
    pub platform: Platform,
    /// Organization (GitHub), group path (GitLab), or `org/project` (Azure).
    pub name: String,
    /// Private repositories created and last pushed before this date are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<NaiveDate>,
    /// Maximum repositories processed for this target in one run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_cap: Option<usize>,
}

impl ScanTarget {
    pub fn new(platform: Platform, name: impl Into<String>) -> Self {
        Self {
            platform,
            name: name.into(),
            created_after: None,
            item_cap: None,
        }
    }

    /// Label used in logs and progress output: `"{platform}:{name}"`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.platform, self.name)
    }

    /// Filesystem-safe form of the target name.
    ///
    /// ```rust
    /// use codejson_harvester_core::models::{Platform, ScanTarget};
    ///
    /// let t = ScanTarget::new(Platform::Azure, "Agency/Project One");
    /// assert_eq!(t.slug(), "agency_project_one");
    /// ```
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// File name of this target's intermediate snapshot.
    ///
    /// The slug alone is lossy (`cdc/ncird` and `cdc_ncird` share one), so
    /// the name carries a short SHA-256 of the raw target name as well.
    pub fn snapshot_file_name(&self) -> String {
        let digest = Sha256::digest(self.name.as_bytes());
        format!(
            "intermediate_{}_{}_{}.json",
            self.platform,
            self.slug(),
            &hex::encode(digest)[..8]
        )
    }
}

/// Stable repository identity: platform plus the platform's repository ID.
///
/// Names collide across platforms and organizations, so the ID is the
/// dedup and cache key. Ordering is `(platform, repo_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIdentity {
    pub platform: Platform,
    pub repo_id: String,
}

impl RepositoryIdentity {
    pub fn new(platform: Platform, repo_id: impl Into<String>) -> Self {
        Self {
            platform,
            repo_id: repo_id.into(),
        }
    }

    /// Non-public identifier assigned to private and internal repositories.
    pub fn private_id(&self) -> String {
        format!("{}_{}", self.platform, self.repo_id)
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.repo_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

impl Visibility {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// Minimal per-repository metadata returned by a listing call.
///
/// Carries just enough to decide cache freshness without fetching the
/// expensive detail payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub identity: RepositoryIdentity,
    pub name: String,
    #[serde(rename = "lastCommitSHA", default)]
    pub last_commit_sha: Option<String>,
    #[serde(default)]
    pub is_empty: bool,
    #[serde(default)]
    pub is_fork: bool,
    pub visibility: Visibility,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

impl RepositorySummary {
    /// True when the repository was created or pushed on or after `date`.
    pub fn touched_since(&self, date: NaiveDate) -> bool {
        let on_or_after = |ts: &Option<DateTime<Utc>>| {
            ts.map(|t| t.date_naive() >= date).unwrap_or(false)
        };
        on_or_after(&self.created_at) || on_or_after(&self.pushed_at)
    }

    /// Creation-date filter: public repositories always pass, private and
    /// internal ones only when touched on or after the filter date.
    pub fn passes_date_filter(&self, created_after: Option<NaiveDate>) -> bool {
        match created_after {
            None => true,
            Some(_) if self.visibility.is_public() => true,
            Some(date) => self.touched_since(date),
        }
    }
}

/// Full detail payload fetched on a cache miss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDetail {
    #[serde(default)]
    pub labor_hours: f64,
    /// Pass-through analysis fields (permissions, readme, contributors, ...).
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// One repository entry of an intermediate snapshot.
///
/// Created fresh on a cache miss and carried over unmodified on a cache
/// hit. The `analysis` bag is opaque to the harvester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    #[serde(flatten)]
    pub identity: RepositoryIdentity,
    pub name: String,
    pub organization: String,
    #[serde(rename = "lastCommitSHA")]
    pub last_commit_sha: Option<String>,
    pub is_empty: bool,
    pub labor_hours: f64,
    pub visibility: Visibility,
    pub harvested_at: DateTime<Utc>,
    #[serde(default)]
    pub analysis: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

impl RepositoryRecord {
    /// Build a record from a freshly fetched detail payload.
    pub fn from_detail(
        summary: &RepositorySummary,
        organization: &str,
        detail: RepositoryDetail,
        harvested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: summary.identity.clone(),
            name: summary.name.clone(),
            organization: organization.to_string(),
            last_commit_sha: summary.last_commit_sha.clone(),
            is_empty: summary.is_empty,
            labor_hours: detail.labor_hours,
            visibility: summary.visibility,
            harvested_at,
            analysis: detail.fields,
            processing_error: None,
        }
    }

    /// Build a degraded record: identity plus an error marker.
    ///
    /// Degraded records keep the snapshot's repository count auditable
    /// and are never reused as cache entries.
    pub fn degraded(
        summary: &RepositorySummary,
        organization: &str,
        error: impl Into<String>,
        harvested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: summary.identity.clone(),
            name: summary.name.clone(),
            organization: organization.to_string(),
            last_commit_sha: summary.last_commit_sha.clone(),
            is_empty: summary.is_empty,
            labor_hours: 0.0,
            visibility: summary.visibility,
            harvested_at,
            analysis: Map::new(),
            processing_error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.processing_error.is_some()
    }

    /// `privateID` for private and internal repositories.
    pub fn private_id(&self) -> Option<String> {
        if self.visibility.is_public() {
            None
        } else {
            Some(self.identity.private_id())
        }
    }
}

/// Durable per-target output of one run, and the next run's cache input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateSnapshot {
    pub target: ScanTarget,
    pub scan_id: String,
    pub scanned_at: DateTime<Utc>,
    pub records: Vec<RepositoryRecord>,
}

impl IntermediateSnapshot {
    /// Build a snapshot with records sorted by identity.
    pub fn new(
        target: ScanTarget,
        scan_id: impl Into<String>,
        scanned_at: DateTime<Utc>,
        mut records: Vec<RepositoryRecord>,
    ) -> Self {
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        Self {
            target,
            scan_id: scan_id.into(),
            scanned_at,
            records,
        }
    }

    pub fn degraded_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_degraded()).count()
    }
}
