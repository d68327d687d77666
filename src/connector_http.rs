//! HTTP inventory connector.
//!
//! Talks to a JSON inventory service that fronts a hosting platform:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET {base}/targets/{platform}/{name}/repositories?page=N&per_page=M` | `{ "repositories": [summary...], "nextPage": N? }` |
//! | `GET {base}/repositories/{platform}/{repoId}` | `{ "laborHours": f64, "fields": {...} }` |
//!
//! Authentication is an optional bearer token read from the environment
//! variable named in `token_env`.
//!
//! # Status handling
//!
//! - 401/403 → `Unauthorized`, 404 → `NotFound` (never retried)
//! - 429 → `RateLimited`, honoring a `Retry-After` header in seconds
//! - 5xx and network errors → `Transient`
//! - Other 4xx → `Fatal`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use codejson_harvester_core::models::{
    Platform, RepositoryDetail, RepositorySummary, ScanTarget,
};

use crate::config::HttpConnectorConfig;
use crate::error::RemoteError;
use crate::traits::Connector;

/// Upper bound on pages fetched for one listing.
const MAX_PAGES: u32 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryPage {
    repositories: Vec<RepositorySummary>,
    #[serde(default)]
    next_page: Option<u32>,
}

pub struct HttpConnector {
    name: String,
    platform: Platform,
    base_url: Url,
    page_size: usize,
    token: Option<String>,
    client: Client,
}

impl HttpConnector {
    pub fn new(platform: Platform, config: HttpConnectorConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url for {}: {}", platform, config.base_url))?;

        let token = match &config.token_env {
            Some(var) => match std::env::var(var) {
                Ok(t) if !t.trim().is_empty() => Some(t),
                _ => {
                    tracing::warn!(
                        connector = %platform,
                        env = %var,
                        "token variable not set; requests will be unauthenticated"
                    );
                    None
                }
            },
            None => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("codejson-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            name: platform.to_string(),
            platform,
            base_url,
            page_size: config.page_size,
            token,
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Fatal(format!("base_url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), retry_after, &body))
}

#[async_trait]
impl Connector for HttpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Lists repositories from a JSON inventory service over HTTP"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn connector_type(&self) -> &str {
        "http"
    }

    async fn list_repositories(
        &self,
        target: &ScanTarget,
    ) -> Result<Vec<RepositorySummary>, RemoteError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let mut url = self.url(&[
                "targets",
                self.platform.as_str(),
                &target.name,
                "repositories",
            ])?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &self.page_size.to_string());

            let batch: RepositoryPage = self.get_json(url).await?;
            tracing::debug!(
                scan = %target.label(),
                page,
                count = batch.repositories.len(),
                "listed page"
            );
            all.extend(batch.repositories);

            match batch.next_page {
                Some(next) if next > page && next <= MAX_PAGES => page = next,
                _ => break,
            }
        }
        Ok(all)
    }

    async fn fetch_full_detail(
        &self,
        summary: &RepositorySummary,
    ) -> Result<RepositoryDetail, RemoteError> {
        let url = self.url(&[
            "repositories",
            self.platform.as_str(),
            &summary.identity.repo_id,
        ])?;
        self.get_json(url).await
    }
}
