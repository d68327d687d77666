//! Collaborator traits for repository discovery and analysis.
//!
//! The harvesting engine never speaks a platform protocol directly. It
//! reaches repositories through a [`Connector`] per platform and, after a
//! fresh fetch, optionally runs an [`Analyzer`] over the detail payload.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ │
//! │  │ github   │ │ gitlab   │ │ azure    │ │
//! │  │ manifest │ │ http     │ │ (custom) │ │
//! │  └──────────┘ └──────────┘ └──────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        run_target() → orchestrator → snapshot
//! ```
//!
//! # Usage
//!
//! ```rust
//! use codejson_harvester::traits::ConnectorRegistry;
//!
//! let mut connectors = ConnectorRegistry::new();
//! // connectors.register(Arc::new(MyConnector::new()));
//! assert!(connectors.is_empty());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use codejson_harvester_core::models::{
    Platform, RepositoryDetail, RepositorySummary, ScanTarget,
};

use crate::config::{Config, ConnectorConfig};
use crate::error::RemoteError;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// Repository discovery and detail retrieval for one platform.
///
/// # Lifecycle
///
/// 1. The connector is registered via [`ConnectorRegistry::register`].
/// 2. [`list_repositories`](Connector::list_repositories) is called once per
///    scan target, wrapped in the retry policy as a single operation.
/// 3. [`fetch_full_detail`](Connector::fetch_full_detail) is called for
///    every repository whose cached record is stale.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use codejson_harvester::error::RemoteError;
/// use codejson_harvester::traits::Connector;
/// use codejson_harvester_core::models::*;
///
/// pub struct EmptyConnector;
///
/// #[async_trait]
/// impl Connector for EmptyConnector {
///     fn name(&self) -> &str { "empty" }
///     fn description(&self) -> &str { "Lists nothing" }
///     fn platform(&self) -> Platform { Platform::Github }
///
///     async fn list_repositories(
///         &self,
///         _target: &ScanTarget,
///     ) -> Result<Vec<RepositorySummary>, RemoteError> {
///         Ok(vec![])
///     }
///
///     async fn fetch_full_detail(
///         &self,
///         summary: &RepositorySummary,
///     ) -> Result<RepositoryDetail, RemoteError> {
///         Err(RemoteError::NotFound(summary.name.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector instance name (e.g. `"github"`).
    fn name(&self) -> &str;

    /// Returns a one-line description of what this connector does.
    ///
    /// Used in `harvest sources` output.
    fn description(&self) -> &str;

    /// Platform whose targets this connector serves.
    fn platform(&self) -> Platform;

    /// Returns the connector type identifier (`"manifest"`, `"http"`, `"custom"`).
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// List every repository of `target` with its current fingerprint.
    ///
    /// Pagination, if any, is internal to the connector. The whole listing
    /// is retried as one unit.
    async fn list_repositories(
        &self,
        target: &ScanTarget,
    ) -> Result<Vec<RepositorySummary>, RemoteError>;

    /// Fetch the expensive detail payload for one repository.
    async fn fetch_full_detail(
        &self,
        summary: &RepositorySummary,
    ) -> Result<RepositoryDetail, RemoteError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Analyzer Trait
// ═══════════════════════════════════════════════════════════════════════

/// Post-fetch analysis over a repository's detail payload.
///
/// Both steps run only on a cache miss. Returned fields are merged into the
/// record's analysis bag (top-level keys replace existing ones). The
/// default implementations contribute nothing.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Exemption fields, typically a `permissions` object with `usageType`
    /// and `exemptionText`.
    async fn classify_exemption(
        &self,
        _summary: &RepositorySummary,
        _detail: &RepositoryDetail,
    ) -> Result<Map<String, Value>, RemoteError> {
        Ok(Map::new())
    }

    /// Organization fields, typically `organization`.
    async fn infer_organization(
        &self,
        _summary: &RepositorySummary,
        _detail: &RepositoryDetail,
    ) -> Result<Map<String, Value>, RemoteError> {
        Ok(Map::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of connectors, at most one per platform.
///
/// Use [`ConnectorRegistry::from_config`] to build the connectors declared
/// under `[connectors.<platform>]`, then optionally call
/// [`register`](ConnectorRegistry::register) to replace one with a custom
/// implementation.
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry with every connector configured in the config file.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::connector_http::HttpConnector;
        use crate::connector_manifest::ManifestConnector;

        let mut registry = Self::new();
        for platform in Platform::all() {
            match config.connectors.for_platform(platform) {
                Some(ConnectorConfig::Manifest(cfg)) => {
                    registry.register(Arc::new(ManifestConnector::new(platform, cfg.clone())));
                }
                Some(ConnectorConfig::Http(cfg)) => {
                    registry.register(Arc::new(HttpConnector::new(platform, cfg.clone())?));
                }
                None => {}
            }
        }
        Ok(registry)
    }

    /// Register a connector, replacing any existing one for the same platform.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let platform = connector.platform();
        self.connectors.retain(|c| c.platform() != platform);
        self.connectors.push(connector);
    }

    /// Get all registered connectors.
    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    /// Find the connector serving `platform`.
    pub fn find(&self, platform: Platform) -> Option<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.platform() == platform)
            .cloned()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Return the count of registered connectors.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
