//! Resolution tiers
//!
//! Each tier is a strategy behind [`ResolutionTier`]; the resolver walks them
//! in priority order and stops at the first hit. Outcomes are values, not
//! errors: a tier that fails internally reports [`TierOutcome::Miss`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::cache::CacheRepository;
use crate::context::RunContext;
use crate::overrides::StaticOverrideStore;
use crate::registry::{ExternalLookupClient, ExternalOutcome};
use crate::temp_id::TempIdGenerator;
use crate::types::{LookupKey, NormalizedRequest, ResolutionSource, TierKind};

/// Confidence for overrides and identifiers already on the row
pub const TRUSTED_CONFIDENCE: f64 = 1.0;

/// Confidence for synthetic identifiers
pub const TEMP_ID_CONFIDENCE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TierHit {
    pub tier: TierKind,
    pub company_id: String,
    pub confidence: f64,
    pub source: ResolutionSource,
    /// Cache key that matched, for cache hits
    pub matched_key: Option<LookupKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Hit(TierHit),
    Miss,
    /// Tier deliberately not attempted for this row
    Skip,
}

#[async_trait]
pub trait ResolutionTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Whether this tier is certain to hit `row` whatever the run state.
    ///
    /// Checked while preparing, so claimed rows stay out of later batched
    /// round trips. Must be side-effect free; tiers whose outcome depends on
    /// the run keep the default.
    fn claims(&self, _row: &NormalizedRequest) -> bool {
        false
    }

    /// Batch hook, called once per `resolve_batch` with the rows no earlier
    /// tier has claimed.
    async fn prepare(&self, _rows: &[&NormalizedRequest], _run: &RunContext) {}

    async fn attempt(&self, row: &NormalizedRequest, run: &RunContext) -> TierOutcome;
}

pub struct OverrideTier {
    store: Arc<StaticOverrideStore>,
}

impl OverrideTier {
    pub fn new(store: Arc<StaticOverrideStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResolutionTier for OverrideTier {
    fn kind(&self) -> TierKind {
        TierKind::Override
    }

    fn claims(&self, row: &NormalizedRequest) -> bool {
        self.store.lookup(row).is_some()
    }

    async fn attempt(&self, row: &NormalizedRequest, _run: &RunContext) -> TierOutcome {
        match self.store.lookup(row) {
            Some(hit) => {
                tracing::debug!(map = hit.map, company_id = %hit.company_id, "Override hit");
                TierOutcome::Hit(TierHit {
                    tier: TierKind::Override,
                    company_id: hit.company_id,
                    confidence: TRUSTED_CONFIDENCE,
                    source: ResolutionSource::Override,
                    matched_key: None,
                })
            }
            None => TierOutcome::Miss,
        }
    }
}

pub struct CacheTier {
    repository: Arc<dyn CacheRepository>,
}

impl CacheTier {
    pub fn new(repository: Arc<dyn CacheRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ResolutionTier for CacheTier {
    fn kind(&self) -> TierKind {
        TierKind::Cache
    }

    /// One batch lookup for every row that does not already carry an identifier
    async fn prepare(&self, rows: &[&NormalizedRequest], run: &RunContext) {
        let batch: Vec<NormalizedRequest> = rows
            .iter()
            .filter(|r| r.existing_company_id.is_none() && !r.cache_keys().is_empty())
            .map(|r| (*r).clone())
            .collect();
        if batch.is_empty() {
            return;
        }

        run.update_stats(|s| s.cache_batches += 1);
        match self.repository.batch_lookup(&batch).await {
            Ok(found) => run.absorb_cache_rows(found.into_iter().flatten()),
            Err(e) => {
                tracing::warn!(rows = batch.len(), error = %e, "Cache batch lookup failed, rows fall through");
                run.update_stats(|s| s.cache_failures += 1);
            }
        }
    }

    async fn attempt(&self, row: &NormalizedRequest, run: &RunContext) -> TierOutcome {
        if row.existing_company_id.is_some() {
            return TierOutcome::Skip;
        }
        match run.cached(row) {
            Some(found) => {
                let key = found.key();
                self.repository.record_hit(&key);
                TierOutcome::Hit(TierHit {
                    tier: TierKind::Cache,
                    company_id: found.company_id,
                    confidence: found.confidence,
                    source: ResolutionSource::DbCache,
                    matched_key: Some(key),
                })
            }
            None => TierOutcome::Miss,
        }
    }
}

/// Trusts an identifier already present on the row
pub struct ExistingColumnTier;

#[async_trait]
impl ResolutionTier for ExistingColumnTier {
    fn kind(&self) -> TierKind {
        TierKind::Existing
    }

    fn claims(&self, row: &NormalizedRequest) -> bool {
        row.existing_company_id.is_some()
    }

    async fn attempt(&self, row: &NormalizedRequest, _run: &RunContext) -> TierOutcome {
        match &row.existing_company_id {
            Some(id) => TierOutcome::Hit(TierHit {
                tier: TierKind::Existing,
                company_id: id.clone(),
                confidence: TRUSTED_CONFIDENCE,
                source: ResolutionSource::ExistingColumn,
                matched_key: None,
            }),
            None => TierOutcome::Miss,
        }
    }
}

/// Registry search, at most one call per distinct name per run
pub struct ExternalTier {
    client: Option<ExternalLookupClient>,
}

impl ExternalTier {
    pub fn new(client: Option<ExternalLookupClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResolutionTier for ExternalTier {
    fn kind(&self) -> TierKind {
        TierKind::External
    }

    async fn attempt(&self, row: &NormalizedRequest, run: &RunContext) -> TierOutcome {
        let (Some(client), Some(name)) = (&self.client, row.registry_name()) else {
            return TierOutcome::Miss;
        };

        let found = match run.external_memo(name) {
            Some(found) => {
                run.update_stats(|s| s.external_deduplicated += 1);
                found
            }
            None => {
                let outcome = client.lookup_detailed(name, run.budget()).await;
                run.update_stats(|s| match &outcome {
                    ExternalOutcome::Matched(_) => s.external_calls += 1,
                    ExternalOutcome::NoMatch => {
                        s.external_calls += 1;
                        s.external_no_match += 1;
                    }
                    ExternalOutcome::Failed => {
                        s.external_calls += 1;
                        s.external_failures += 1;
                    }
                    ExternalOutcome::BudgetExhausted => s.external_budget_exhausted += 1,
                });
                // exhaustion is not remembered: the budget is the gate
                if !outcome.made_call() {
                    return TierOutcome::Miss;
                }
                let found = outcome.into_match();
                run.remember_external(name, found.clone());
                found
            }
        };

        match found {
            Some(m) => TierOutcome::Hit(TierHit {
                tier: TierKind::External,
                company_id: m.company_id,
                confidence: m.confidence,
                source: ResolutionSource::ExternalApi,
                matched_key: None,
            }),
            None => TierOutcome::Miss,
        }
    }
}

/// Terminal tier: always hits
pub struct TempIdTier {
    generator: TempIdGenerator,
}

impl TempIdTier {
    pub fn new(generator: TempIdGenerator) -> Self {
        Self { generator }
    }

    pub fn hit(&self, row: &NormalizedRequest, run: &RunContext) -> TierHit {
        let company_id = run.temp_id_for(&row.fallback_key(), |key| self.generator.generate(key));
        TierHit {
            tier: TierKind::TempId,
            company_id,
            confidence: TEMP_ID_CONFIDENCE,
            source: ResolutionSource::TempId,
            matched_key: None,
        }
    }
}

#[async_trait]
impl ResolutionTier for TempIdTier {
    fn kind(&self) -> TierKind {
        TierKind::TempId
    }

    fn claims(&self, _row: &NormalizedRequest) -> bool {
        true
    }

    async fn attempt(&self, row: &NormalizedRequest, run: &RunContext) -> TierOutcome {
        TierOutcome::Hit(self.hit(row, run))
    }
}
