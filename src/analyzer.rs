//! Rule-based analyzer.
//!
//! A deterministic stand-in for the model-backed exemption and
//! organization inference. It only reads what the connector already put in
//! the detail payload (`permissions`, `readme_content`) and never calls
//! out, so it never fails.
//!
//! # Exemption cascade
//!
//! | Visibility | Rule | `usageType` |
//! |------------|------|-------------|
//! | any | `permissions.usageType` already set | unchanged |
//! | public | `permissions.licenses` non-empty | `openSource` |
//! | public | otherwise | `governmentWideReuse` |
//! | private/internal | README `Exemption:` + `Exemption justification:` lines | the declared code |
//! | private/internal | README mentions a sensitive keyword | `exemptByLaw` |
//! | private/internal | otherwise | `governmentWideReuse` |

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use codejson_harvester_core::models::{RepositoryDetail, RepositorySummary};

use crate::config::AnalysisConfig;
use crate::error::RemoteError;
use crate::traits::Analyzer;

pub const USAGE_OPEN_SOURCE: &str = "openSource";
pub const USAGE_GOVERNMENT_WIDE_REUSE: &str = "governmentWideReuse";
pub const EXEMPT_BY_LAW: &str = "exemptByLaw";

const EXEMPTION_CODES: &[&str] = &[
    "exemptByLaw",
    "exemptNonCode",
    "exemptByNationalSecurity",
    "exemptByAgencySystem",
    "exemptByMissionSystem",
    "exemptByCIO",
];

pub struct RuleAnalyzer {
    sensitive_keywords: Vec<String>,
    organizations: BTreeMap<String, String>,
}

impl RuleAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            sensitive_keywords: config.sensitive_keywords.clone(),
            organizations: config.organizations.clone(),
        }
    }

    fn exemption(&self, summary: &RepositorySummary, detail: &RepositoryDetail) -> Option<Value> {
        let mut permissions = match detail.fields.get("permissions") {
            Some(Value::Object(p)) => p.clone(),
            _ => Map::new(),
        };
        let already = permissions
            .get("usageType")
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if already {
            return None;
        }

        let readme = readme(detail);
        let (usage, text) = if summary.visibility.is_public() {
            let licensed = permissions
                .get("licenses")
                .and_then(|l| l.as_array())
                .map(|l| !l.is_empty())
                .unwrap_or(false);
            if licensed {
                (USAGE_OPEN_SOURCE.to_string(), None)
            } else {
                (USAGE_GOVERNMENT_WIDE_REUSE.to_string(), None)
            }
        } else if let Some((code, why)) = declared_exemption(readme) {
            (code, Some(why))
        } else if let Some(found) = self.sensitive_hits(readme) {
            (
                EXEMPT_BY_LAW.to_string(),
                Some(format!("Flagged: Found keywords in README: [{}]", found.join(", "))),
            )
        } else {
            (USAGE_GOVERNMENT_WIDE_REUSE.to_string(), None)
        };

        permissions.insert("usageType".to_string(), Value::String(usage));
        permissions.insert(
            "exemptionText".to_string(),
            text.map(Value::String).unwrap_or(Value::Null),
        );
        Some(Value::Object(permissions))
    }

    fn sensitive_hits(&self, readme: &str) -> Option<Vec<String>> {
        if readme.is_empty() {
            return None;
        }
        let words: Vec<String> = tokens(readme);
        let found: Vec<String> = self
            .sensitive_keywords
            .iter()
            .filter(|kw| {
                let kw_tokens = tokens(kw);
                !kw_tokens.is_empty()
                    && words
                        .windows(kw_tokens.len())
                        .any(|w| w == kw_tokens.as_slice())
            })
            .cloned()
            .collect();
        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    }

    fn organization(&self, summary: &RepositorySummary, detail: &RepositoryDetail) -> Option<String> {
        if let Some(org) = field_line(readme(detail), "organization") {
            return Some(org.to_string());
        }
        let name_tokens = tokens(&summary.name);
        let mut known: Vec<(&String, &String)> = self.organizations.iter().collect();
        // longest acronym first so "NCEZID" beats "NCE"
        known.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        known
            .into_iter()
            .find(|(acronym, _)| name_tokens.iter().any(|t| t.eq_ignore_ascii_case(acronym)))
            .map(|(_, full)| full.clone())
    }
}

#[async_trait]
impl Analyzer for RuleAnalyzer {
    fn name(&self) -> &str {
        "rules"
    }

    async fn classify_exemption(
        &self,
        summary: &RepositorySummary,
        detail: &RepositoryDetail,
    ) -> Result<Map<String, Value>, RemoteError> {
        let mut out = Map::new();
        if let Some(permissions) = self.exemption(summary, detail) {
            out.insert("permissions".to_string(), permissions);
        }
        Ok(out)
    }

    async fn infer_organization(
        &self,
        summary: &RepositorySummary,
        detail: &RepositoryDetail,
    ) -> Result<Map<String, Value>, RemoteError> {
        let mut out = Map::new();
        if let Some(org) = self.organization(summary, detail) {
            out.insert("organization".to_string(), json!(org));
        }
        Ok(out)
    }
}

fn readme(detail: &RepositoryDetail) -> &str {
    detail
        .fields
        .get("readme_content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Value of a `Key: value` line, matched case-insensitively.
fn field_line<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let (k, v) = line.trim().split_once(':')?;
        let v = v.trim();
        if k.trim().eq_ignore_ascii_case(key) && !v.is_empty() {
            Some(v)
        } else {
            None
        }
    })
}

fn declared_exemption(readme: &str) -> Option<(String, String)> {
    let code = field_line(readme, "exemption")?.split_whitespace().next()?;
    let why = field_line(readme, "exemption justification")?;
    if EXEMPTION_CODES.contains(&code) {
        Some((code.to_string(), why.to_string()))
    } else {
        None
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}
