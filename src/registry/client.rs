//! Registry search client
//!
//! Rate-limited HTTP transport plus the budget-gated lookup used by the
//! external tier. Nothing here writes to the cache; backflow belongs to the
//! resolver.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use url::Url;

use super::types::{RegistryCandidate, RegistryResponse};
use crate::budget::Budget;
use crate::config::RegistryConfig;
use crate::error::{ConfigError, ConfigResult, LookupError, LookupResult};
use crate::normalize::NormalizationService;

/// Confidence assigned to every registry match; not scored per candidate.
pub const EXTERNAL_MATCH_CONFIDENCE: f64 = 0.9;

/// Transport seam for the registry search endpoint
#[async_trait]
pub trait RegistrySearch: Send + Sync {
    async fn search(&self, name: &str) -> LookupResult<Vec<RegistryCandidate>>;
}

pub struct HttpRegistrySearch {
    client: Client,
    search_url: Url,
    token: String,
    page_size: usize,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpRegistrySearch {
    pub fn new(config: &RegistryConfig, token: impl Into<String>) -> ConfigResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(client, config, token)
    }

    /// Use a caller-built client (proxy, TLS roots, default headers)
    pub fn with_client(
        client: Client,
        config: &RegistryConfig,
        token: impl Into<String>,
    ) -> ConfigResult<Self> {
        Ok(Self {
            client,
            search_url: search_url(&config.base_url)?,
            token: token.into(),
            page_size: config.page_size,
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Space out requests; the lock is held across the sleep so callers queue
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn search_url(base_url: &str) -> ConfigResult<Url> {
    let invalid = |reason: String| ConfigError::InvalidRegistryUrl {
        url: base_url.to_string(),
        reason,
    };
    let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "https" | "http") {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }
    let joined = format!("{}/companies/search", base.as_str().trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl RegistrySearch for HttpRegistrySearch {
    async fn search(&self, name: &str) -> LookupResult<Vec<RegistryCandidate>> {
        self.rate_limit().await;

        let limit = self.page_size.to_string();
        let response = self
            .client
            .get(self.search_url.clone())
            .bearer_auth(&self.token)
            .query(&[("name", name), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let text = response.text().await?;
        let parsed: RegistryResponse<Vec<RegistryCandidate>> = serde_json::from_str(&text)?;
        Ok(parsed.data)
    }
}

/// Registry match accepted by the external tier
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMatch {
    pub company_id: String,
    pub confidence: f64,
    pub matched_name: String,
}

/// What a single external lookup did
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalOutcome {
    Matched(ExternalMatch),
    /// Call made, no candidate normalized to the query
    NoMatch,
    /// Call made and failed; absorbed
    Failed,
    /// No call made
    BudgetExhausted,
}

impl ExternalOutcome {
    pub fn into_match(self) -> Option<ExternalMatch> {
        match self {
            ExternalOutcome::Matched(m) => Some(m),
            _ => None,
        }
    }

    pub fn made_call(&self) -> bool {
        !matches!(self, ExternalOutcome::BudgetExhausted)
    }
}

/// Budget-gated registry lookup
#[derive(Clone)]
pub struct ExternalLookupClient {
    search: Arc<dyn RegistrySearch>,
    normalizer: NormalizationService,
}

impl ExternalLookupClient {
    pub fn new(search: Arc<dyn RegistrySearch>) -> Self {
        Self {
            search,
            normalizer: NormalizationService::new(),
        }
    }

    pub fn from_config(config: &RegistryConfig, token: impl Into<String>) -> ConfigResult<Self> {
        Ok(Self::new(Arc::new(HttpRegistrySearch::new(config, token)?)))
    }

    /// Look up a normalized name. `None` on exhaustion, no match or failure.
    pub async fn lookup(&self, normalized_name: &str, budget: &Budget) -> Option<ExternalMatch> {
        self.lookup_detailed(normalized_name, budget)
            .await
            .into_match()
    }

    /// Same as [`lookup`](Self::lookup), reporting why it missed
    pub async fn lookup_detailed(&self, normalized_name: &str, budget: &Budget) -> ExternalOutcome {
        if !budget.try_consume() {
            tracing::debug!(name = %normalized_name, "External budget exhausted, skipping registry call");
            return ExternalOutcome::BudgetExhausted;
        }

        let candidates = match self.search.search(normalized_name).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(name = %normalized_name, error = %e, "Registry lookup failed, falling through");
                return ExternalOutcome::Failed;
            }
        };

        // exact match on the normalized key only
        let hit = candidates.into_iter().find(|c| {
            c.names()
                .any(|n| self.normalizer.normalize(n) == normalized_name)
        });

        match hit {
            Some(candidate) if !candidate.id.trim().is_empty() => {
                ExternalOutcome::Matched(ExternalMatch {
                    company_id: candidate.id.trim().to_string(),
                    confidence: EXTERNAL_MATCH_CONFIDENCE,
                    matched_name: candidate.name,
                })
            }
            _ => ExternalOutcome::NoMatch,
        }
    }
}
