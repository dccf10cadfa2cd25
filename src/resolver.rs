//! Company identifier resolver
//!
//! Walks the tiers in priority order for every request:
//!
//! ```text
//! override → cache (batched) → existing column → external registry → temp id
//! ```
//!
//! The first hit wins. Identifiers found by the existing-column or external
//! tiers are written back to the cache (backflow) so later rows with the same
//! key stop at the cache tier. Resolution is total: the terminal tier always
//! produces an identifier and no tier failure escapes.

use std::sync::Arc;

use crate::cache::CacheRepository;
use crate::config::ResolverConfig;
use crate::context::RunContext;
use crate::error::ConfigResult;
use crate::normalize::NormalizationService;
use crate::overrides::StaticOverrideStore;
use crate::registry::ExternalLookupClient;
use crate::temp_id::TempIdGenerator;
use crate::tiers::{
    CacheTier, ExistingColumnTier, ExternalTier, OverrideTier, ResolutionTier, TempIdTier,
    TierHit, TierOutcome,
};
use crate::types::{
    DecisionPath, NormalizedRequest, Resolution, ResolutionRequest, ResolutionResult,
    ResolutionSource, TierKind, Verdict,
};

pub struct Resolver {
    normalizer: NormalizationService,
    tiers: Vec<Box<dyn ResolutionTier>>,
    terminal: TempIdTier,
    cache: Arc<dyn CacheRepository>,
}

impl Resolver {
    pub fn new(
        overrides: Arc<StaticOverrideStore>,
        cache: Arc<dyn CacheRepository>,
        external: Option<ExternalLookupClient>,
        temp_ids: TempIdGenerator,
    ) -> Self {
        let tiers: Vec<Box<dyn ResolutionTier>> = vec![
            Box::new(OverrideTier::new(overrides)),
            Box::new(CacheTier::new(cache.clone())),
            Box::new(ExistingColumnTier),
            Box::new(ExternalTier::new(external)),
        ];
        Self {
            normalizer: NormalizationService::new(),
            tiers,
            terminal: TempIdTier::new(temp_ids),
            cache,
        }
    }

    /// Wire a resolver from configuration.
    ///
    /// The external tier gets a live client only when it is enabled, budgeted
    /// and has a credential.
    pub fn from_config(
        config: &ResolverConfig,
        overrides: Arc<StaticOverrideStore>,
        cache: Arc<dyn CacheRepository>,
    ) -> ConfigResult<Self> {
        let external = match (&config.external.token, config.external.is_active()) {
            (Some(token), true) => Some(ExternalLookupClient::from_config(
                &config.external.registry,
                token.expose(),
            )?),
            _ => None,
        };
        Ok(Self::new(
            overrides,
            cache,
            external,
            config.temp_id_generator()?,
        ))
    }

    pub fn normalizer(&self) -> &NormalizationService {
        &self.normalizer
    }

    /// Resolve a single request inside a run
    pub async fn resolve(&self, request: &ResolutionRequest, run: &RunContext) -> ResolutionResult {
        let row = NormalizedRequest::from_request(request, &self.normalizer);
        run.update_stats(|s| s.requests += 1);

        self.prepare(std::slice::from_ref(&row), run).await;
        let result = self.resolve_row(&row, run).await;
        self.flush(run).await;
        result
    }

    /// Resolve a batch; one result per request, in input order.
    ///
    /// Exactly one cache round trip is made for the rows that need it. Rows are
    /// then walked in input order so backflow from earlier rows is visible to
    /// later ones.
    pub async fn resolve_batch(
        &self,
        requests: &[ResolutionRequest],
        run: &RunContext,
    ) -> Vec<ResolutionResult> {
        let rows: Vec<NormalizedRequest> = requests
            .iter()
            .map(|r| NormalizedRequest::from_request(r, &self.normalizer))
            .collect();
        run.update_stats(|s| s.requests += rows.len() as u64);

        self.prepare(&rows, run).await;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(self.resolve_row(row, run).await);
        }

        self.flush(run).await;
        results
    }

    /// Let each tier do its batch work, keeping rows claimed by earlier tiers
    /// out of later batches.
    async fn prepare(&self, rows: &[NormalizedRequest], run: &RunContext) {
        let mut pending: Vec<&NormalizedRequest> = rows.iter().collect();
        for tier in &self.tiers {
            tier.prepare(&pending, run).await;
            pending.retain(|row| !tier.claims(row));
        }
    }

    async fn resolve_row(&self, row: &NormalizedRequest, run: &RunContext) -> ResolutionResult {
        let mut path = DecisionPath::default();
        for tier in &self.tiers {
            match tier.attempt(row, run).await {
                TierOutcome::Hit(hit) => {
                    path.push(tier.kind(), Verdict::Hit);
                    return self.finish(row, hit, path, run);
                }
                TierOutcome::Miss => path.push(tier.kind(), Verdict::Miss),
                TierOutcome::Skip => {
                    if tier.kind() == TierKind::Cache {
                        run.update_stats(|s| s.cache_skipped += 1);
                    }
                    path.push(tier.kind(), Verdict::Skip);
                }
            }
        }

        path.push(TierKind::TempId, Verdict::Hit);
        self.finish(row, self.terminal.hit(row, run), path, run)
    }

    fn finish(
        &self,
        row: &NormalizedRequest,
        hit: TierHit,
        path: DecisionPath,
        run: &RunContext,
    ) -> ResolutionResult {
        run.update_stats(|s| s.record_hit(hit.tier));

        if matches!(
            hit.source,
            ResolutionSource::ExistingColumn | ResolutionSource::ExternalApi
        ) {
            if let Some(key) = row.backflow_key() {
                run.stage_backflow(Resolution::new(
                    key,
                    hit.company_id.clone(),
                    hit.confidence,
                    hit.source,
                ));
            }
        }

        tracing::debug!(
            company_id = %hit.company_id,
            source = %hit.source,
            decision_path = %path,
            "Resolved company id"
        );

        ResolutionResult {
            company_id: hit.company_id,
            matched_tier: hit.tier,
            source: hit.source,
            confidence: hit.confidence,
            decision_path: path,
        }
    }

    /// Write staged backflow and buffered hit counts. Failures are logged only.
    async fn flush(&self, run: &RunContext) {
        let pending = run.take_pending_backflow();
        if !pending.is_empty() {
            let rows = crate::cache::merge_by_key(&pending);
            match self.cache.upsert_many(&rows).await {
                Ok(()) => run.update_stats(|s| s.backflow_writes += rows.len() as u64),
                Err(e) => {
                    tracing::warn!(rows = rows.len(), error = %e, "Cache backflow failed");
                    run.update_stats(|s| s.backflow_failures += rows.len() as u64);
                }
            }
        }

        if let Err(e) = self.cache.flush_hits().await {
            tracing::warn!(error = %e, "Failed to persist cache hit counts");
            run.update_stats(|s| s.hit_flush_failures += 1);
        }
    }
}
