use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use codejson_harvester_core::delay::{AdaptiveDelayConfig, DelayConfig};
use codejson_harvester_core::models::{Platform, ScanTarget};
use codejson_harvester_core::retry::RetryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub adaptive_delay: AdaptiveDelayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Directory holding intermediate snapshots, the catalog, and audit files.
    pub dir: PathBuf,
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
    #[serde(default = "default_exemption_log")]
    pub exemption_log: String,
    #[serde(default = "default_private_id_map")]
    pub private_id_map: String,
    #[serde(default = "default_agency")]
    pub agency: String,
}

fn default_catalog_file() -> String {
    "code.json".to_string()
}
fn default_exemption_log() -> String {
    "exempted_log.json".to_string()
}
fn default_private_id_map() -> String {
    "privateid_mapping.json".to_string()
}
fn default_agency() -> String {
    "CDC".to_string()
}

impl OutputConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join(&self.catalog_file)
    }

    pub fn exemption_log_path(&self) -> PathBuf {
        self.dir.join(&self.exemption_log)
    }

    pub fn private_id_map_path(&self) -> PathBuf {
        self.dir.join(&self.private_id_map)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Global cap on repositories processed across all targets in one run.
    #[serde(default)]
    pub item_cap: Option<usize>,
    /// Default creation-date filter for targets that do not set their own.
    #[serde(default)]
    pub created_after: Option<NaiveDate>,
    #[serde(default = "default_skip_forks")]
    pub skip_forks: bool,
}

fn default_workers() -> usize {
    5
}
fn default_skip_forks() -> bool {
    true
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            item_cap: None,
            created_after: None,
            skip_forks: default_skip_forks(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_enabled")]
    pub enabled: bool,
    /// README keywords that flag a private repository as exempt by law.
    #[serde(default)]
    pub sensitive_keywords: Vec<String>,
    /// Acronym → organization name, matched against repository names.
    #[serde(default)]
    pub organizations: BTreeMap<String, String>,
}

fn default_analysis_enabled() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: default_analysis_enabled(),
            sensitive_keywords: Vec::new(),
            organizations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also write logs to this file (no ANSI colors).
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub platform: Platform,
    pub name: String,
    #[serde(default)]
    pub created_after: Option<NaiveDate>,
    #[serde(default)]
    pub item_cap: Option<usize>,
}

impl TargetConfig {
    /// Resolve into a [`ScanTarget`], inheriting the harvest-wide date filter.
    pub fn to_scan_target(&self, harvest: &HarvestConfig) -> ScanTarget {
        ScanTarget {
            platform: self.platform,
            name: self.name.clone(),
            created_after: self.created_after.or(harvest.created_after),
            item_cap: self.item_cap,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub github: Option<ConnectorConfig>,
    pub gitlab: Option<ConnectorConfig>,
    pub azure: Option<ConnectorConfig>,
}

impl ConnectorsConfig {
    pub fn for_platform(&self, platform: Platform) -> Option<&ConnectorConfig> {
        match platform {
            Platform::Github => self.github.as_ref(),
            Platform::Gitlab => self.gitlab.as_ref(),
            Platform::Azure => self.azure.as_ref(),
        }
    }
}

/// How repositories of one platform are reached.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectorConfig {
    /// Pre-exported JSON inventory on disk.
    Manifest(ManifestConnectorConfig),
    /// JSON inventory service over HTTP.
    Http(HttpConnectorConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManifestConnectorConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConnectorConfig {
    pub base_url: String,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}

impl Config {
    /// Resolved scan targets, in configuration order.
    pub fn scan_targets(&self) -> Vec<ScanTarget> {
        self.targets
            .iter()
            .map(|t| t.to_scan_target(&self.harvest))
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate harvest
    if config.harvest.workers == 0 {
        anyhow::bail!("harvest.workers must be > 0");
    }

    // Validate delays
    if config.delay.base_secs < 0.0 || config.delay.max_secs < 0.0 {
        anyhow::bail!("delay.base_secs and delay.max_secs must be >= 0");
    }
    if config.delay.max_secs < config.delay.base_secs {
        anyhow::bail!("delay.max_secs must be >= delay.base_secs");
    }
    let adaptive = &config.adaptive_delay;
    if adaptive.base_secs < 0.0 || adaptive.max_secs < 0.0 {
        anyhow::bail!("adaptive_delay.base_secs and adaptive_delay.max_secs must be >= 0");
    }
    if !(0.0..=1.0).contains(&adaptive.modified_weight) {
        anyhow::bail!("adaptive_delay.modified_weight must be in [0.0, 1.0]");
    }

    // Validate retry
    if config.retry.backoff_factor < 1.0 {
        anyhow::bail!("retry.backoff_factor must be >= 1.0");
    }
    if config.retry.initial_delay_secs < 0.0 {
        anyhow::bail!("retry.initial_delay_secs must be >= 0");
    }
    if config.retry.max_delay_secs < config.retry.initial_delay_secs {
        anyhow::bail!("retry.max_delay_secs must be >= retry.initial_delay_secs");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        anyhow::bail!("retry.jitter must be in [0.0, 1.0]");
    }

    // Validate targets
    let mut seen = std::collections::HashSet::new();
    let mut files = std::collections::HashMap::new();
    for target in &config.targets {
        if target.name.trim().is_empty() {
            anyhow::bail!("targets[].name must not be empty");
        }
        if !seen.insert((target.platform, target.name.clone())) {
            anyhow::bail!(
                "Duplicate target: {}:{}",
                target.platform,
                target.name
            );
        }
        let file = ScanTarget::new(target.platform, target.name.clone()).snapshot_file_name();
        if let Some(previous) = files.insert(file.clone(), target.name.clone()) {
            anyhow::bail!(
                "Targets '{}' and '{}' would share snapshot file {}",
                previous,
                target.name,
                file
            );
        }
        if config.connectors.for_platform(target.platform).is_none() {
            anyhow::bail!(
                "Target '{}:{}' needs a [connectors.{}] section",
                target.platform,
                target.name,
                target.platform
            );
        }
    }

    for platform in Platform::all() {
        if let Some(ConnectorConfig::Http(http)) = config.connectors.for_platform(platform) {
            if !http.base_url.starts_with("http://") && !http.base_url.starts_with("https://") {
                anyhow::bail!(
                    "connectors.{}.base_url must start with http:// or https://",
                    platform
                );
            }
            if http.page_size == 0 {
                anyhow::bail!("connectors.{}.page_size must be > 0", platform);
            }
        }
    }

    Ok(())
}
