//! `harvest sources`: configured targets and connector health.

use anyhow::Result;

use codejson_harvester_core::models::Platform;

use crate::config::{Config, ConnectorConfig};

/// Health of one platform's connector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorStatus {
    pub platform: Platform,
    pub kind: &'static str,
    pub status: String,
    pub healthy: bool,
}

pub fn connector_status(config: &Config, platform: Platform) -> ConnectorStatus {
    let (kind, status, healthy) = match config.connectors.for_platform(platform) {
        None => ("-", "NOT CONFIGURED".to_string(), false),
        Some(ConnectorConfig::Manifest(m)) => {
            if m.root.is_dir() {
                ("manifest", "OK".to_string(), true)
            } else {
                (
                    "manifest",
                    format!("root does not exist: {}", m.root.display()),
                    false,
                )
            }
        }
        Some(ConnectorConfig::Http(h)) => match &h.token_env {
            Some(var) if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) => {
                ("http", format!("${} not set", var), false)
            }
            _ => ("http", "OK".to_string(), true),
        },
    };
    ConnectorStatus {
        platform,
        kind,
        status,
        healthy,
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<10} {:<10} {:<40} HEALTHY", "PLATFORM", "KIND", "STATUS");
    for platform in Platform::all() {
        let s = connector_status(config, platform);
        println!("{:<10} {:<10} {:<40} {}", s.platform.as_str(), s.kind, s.status, s.healthy);
    }

    println!();
    println!("{:<40} {:<12} ITEM CAP", "TARGET", "CREATED AFTER");
    for target in config.scan_targets() {
        println!(
            "{:<40} {:<12} {}",
            target.label(),
            target
                .created_after
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            target
                .item_cap
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}
