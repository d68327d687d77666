//! Manifest connector: reads a pre-exported repository inventory from disk.
//!
//! Each scan target maps to one JSON file under the configured root,
//! named after the target slug (`<root>/<slug>.json`):
//!
//! ```json
//! {
//!   "repositories": [
//!     {
//!       "platform": "github",
//!       "repoId": "101",
//!       "name": "surveillance-etl",
//!       "lastCommitSHA": "9f2c...",
//!       "isEmpty": false,
//!       "isFork": false,
//!       "visibility": "private",
//!       "createdAt": "2023-04-01T00:00:00Z",
//!       "pushedAt": "2025-01-15T12:00:00Z",
//!       "detail": { "laborHours": 120.0, "fields": { "readme_content": "..." } }
//!     }
//!   ]
//! }
//! ```
//!
//! Listing parses the file and remembers each entry's `detail`, which
//! [`fetch_full_detail`](Connector::fetch_full_detail) then serves. An entry
//! without `detail` fails its fetch with `NotFound`.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use codejson_harvester_core::models::{
    Platform, RepositoryDetail, RepositoryIdentity, RepositorySummary, ScanTarget,
};

use crate::config::ManifestConnectorConfig;
use crate::error::RemoteError;
use crate::traits::Connector;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    repositories: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    summary: RepositorySummary,
    #[serde(default)]
    detail: Option<RepositoryDetail>,
}

pub struct ManifestConnector {
    name: String,
    platform: Platform,
    config: ManifestConnectorConfig,
    details: RwLock<HashMap<RepositoryIdentity, RepositoryDetail>>,
}

impl ManifestConnector {
    pub fn new(platform: Platform, config: ManifestConnectorConfig) -> Self {
        Self {
            name: platform.to_string(),
            platform,
            config,
            details: RwLock::new(HashMap::new()),
        }
    }

    /// Path of the inventory file for `target`.
    pub fn manifest_path(&self, target: &ScanTarget) -> PathBuf {
        self.config.root.join(format!("{}.json", target.slug()))
    }
}

#[async_trait]
impl Connector for ManifestConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Reads repository inventories exported as JSON files"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn connector_type(&self) -> &str {
        "manifest"
    }

    async fn list_repositories(
        &self,
        target: &ScanTarget,
    ) -> Result<Vec<RepositorySummary>, RemoteError> {
        let path = self.manifest_path(target);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(format!(
                    "no inventory for {} at {}",
                    target.label(),
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RemoteError::Transient(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let manifest: ManifestFile = serde_json::from_str(&content).map_err(|e| {
            RemoteError::Fatal(format!("malformed inventory {}: {}", path.display(), e))
        })?;

        let mut summaries = Vec::with_capacity(manifest.repositories.len());
        let mut details = self
            .details
            .write()
            .map_err(|_| RemoteError::Fatal("manifest detail cache poisoned".to_string()))?;
        for entry in manifest.repositories {
            if entry.summary.identity.platform != self.platform {
                return Err(RemoteError::Fatal(format!(
                    "inventory {} lists {} under platform {}",
                    path.display(),
                    entry.summary.identity,
                    self.platform
                )));
            }
            if let Some(detail) = entry.detail {
                details.insert(entry.summary.identity.clone(), detail);
            }
            summaries.push(entry.summary);
        }
        Ok(summaries)
    }

    async fn fetch_full_detail(
        &self,
        summary: &RepositorySummary,
    ) -> Result<RepositoryDetail, RemoteError> {
        let details = self
            .details
            .read()
            .map_err(|_| RemoteError::Fatal("manifest detail cache poisoned".to_string()))?;
        details
            .get(&summary.identity)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("no detail for {}", summary.identity)))
    }
}
