//! End-to-end resolver behaviour against the in-memory cache and a counting
//! registry double.
//!
//! Covers:
//! 1. Override priority
//! 2. Deterministic fallback identifiers
//! 3. Cache hits with preserved confidence
//! 4. External budget enforcement
//! 5. Existing identifiers with backflow
//! 6. Batch vs single-request equivalence, totality, ratchet
//! 7. Cache outages absorbed without changing results

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use company_id_resolver::error::LookupResult;
use company_id_resolver::registry::{RegistryCandidate, EXTERNAL_MATCH_CONFIDENCE};
use company_id_resolver::temp_id::{self, is_temp_id};
use company_id_resolver::types::NormalizedRequest;
use company_id_resolver::{
    CacheRepository, ExternalLookupClient, InMemoryCacheRepository, LookupError, LookupKey,
    LookupType, RegistrySearch, Resolution, ResolutionRequest, ResolutionSource, Resolver,
    RunContext, StaticOverrideStore, TempIdGenerator, TierKind,
};

// ============================================================================
// TEST FIXTURES
// ============================================================================

const SALT: &str = "scenario-salt-0123456789abcdef";

const OVERRIDES: &str = r#"
plan_code:
  FP0001: "614810477"
customer_name:
  "Pinned Corp": "500000001"
"#;

/// Registry double: answers from a fixed table and counts calls
#[derive(Default)]
struct CountingRegistry {
    known: HashMap<String, String>,
    calls: AtomicUsize,
    fail: bool,
}

impl CountingRegistry {
    fn with(entries: &[(&str, &str)]) -> Self {
        Self {
            known: entries
                .iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrySearch for CountingRegistry {
    async fn search(&self, name: &str) -> LookupResult<Vec<RegistryCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LookupError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self
            .known
            .iter()
            .filter(|(known, _)| known.to_lowercase() == name)
            .map(|(known, id)| RegistryCandidate {
                id: id.clone(),
                name: known.clone(),
                status: Some("ACTIVE".into()),
                registration_number: None,
                former_names: vec![],
            })
            .collect())
    }
}

struct Harness {
    resolver: Resolver,
    cache: Arc<InMemoryCacheRepository>,
    registry: Arc<CountingRegistry>,
}

fn harness(registry: Option<CountingRegistry>) -> Harness {
    let cache = Arc::new(InMemoryCacheRepository::new());
    let registry = Arc::new(registry.unwrap_or_default());
    let external = Some(ExternalLookupClient::new(registry.clone()));
    let resolver = Resolver::new(
        Arc::new(StaticOverrideStore::load_from_str(OVERRIDES).unwrap()),
        cache.clone(),
        external,
        TempIdGenerator::new(SALT).unwrap(),
    );
    Harness {
        resolver,
        cache,
        registry,
    }
}

/// Cache double whose every round trip fails
#[derive(Default)]
struct UnavailableCache {
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

fn cache_down() -> LookupError {
    LookupError::Status {
        status: 503,
        body: "cache unavailable".into(),
    }
}

#[async_trait]
impl CacheRepository for UnavailableCache {
    async fn batch_lookup(
        &self,
        _requests: &[NormalizedRequest],
    ) -> LookupResult<Vec<Option<Resolution>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(cache_down())
    }

    async fn upsert(&self, _resolution: &Resolution) -> LookupResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(cache_down())
    }

    async fn upsert_many(&self, _resolutions: &[Resolution]) -> LookupResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(cache_down())
    }

    fn record_hit(&self, _key: &LookupKey) {}

    async fn flush_hits(&self) -> LookupResult<usize> {
        Err(cache_down())
    }
}

fn named(name: &str) -> ResolutionRequest {
    ResolutionRequest::default().with_customer_name(name)
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_override_wins_over_cache_and_registry() {
    let h = harness(Some(CountingRegistry::with(&[("Example Co", "777")])));
    h.cache.seed(Resolution::new(
        LookupKey::new(LookupType::PlanCode, "FP0001"),
        "123456789",
        1.0,
        ResolutionSource::ExistingColumn,
    ));
    let run = RunContext::with_budget(10);

    let result = h
        .resolver
        .resolve(
            &ResolutionRequest::default()
                .with_plan_code("FP0001")
                .with_customer_name("Example Co"),
            &run,
        )
        .await;

    assert_eq!(result.company_id, "614810477");
    assert_eq!(result.source, ResolutionSource::Override);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.matched_tier, TierKind::Override);
    assert_eq!(h.registry.calls(), 0);
    assert_eq!(h.cache.lookup_calls(), 0);
}

#[tokio::test]
async fn scenario_fallback_id_is_deterministic_across_runs() {
    let h = harness(None);
    let request = named(" Example Co (transferred-out) ");

    let first = h.resolver.resolve(&request, &RunContext::default()).await;
    let second = h.resolver.resolve(&request, &RunContext::default()).await;

    assert_eq!(first.source, ResolutionSource::TempId);
    assert_eq!(first.company_id, temp_id::generate("example co", SALT));
    assert_eq!(first.company_id, second.company_id);
    assert!(is_temp_id(&first.company_id));
    assert_eq!(h.registry.calls(), 0);
}

#[tokio::test]
async fn scenario_cache_hit_preserves_confidence() {
    let h = harness(None);
    h.cache.seed(Resolution::new(
        LookupKey::new(LookupType::CustomerName, "group x"),
        "111111111",
        0.9,
        ResolutionSource::ExternalApi,
    ));
    let run = RunContext::default();

    let result = h.resolver.resolve(&named("  GROUP X  "), &run).await;

    assert_eq!(result.company_id, "111111111");
    assert_eq!(result.source, ResolutionSource::DbCache);
    assert_eq!(result.confidence, 0.9);
    assert_eq!(result.decision_path.to_string(), "override:MISS→cache:HIT");
    // telemetry landed on flush
    let row = h
        .cache
        .get(&LookupKey::new(LookupType::CustomerName, "group x"))
        .unwrap();
    assert_eq!(row.hit_count, 2);
}

#[tokio::test]
async fn scenario_budget_of_one_allows_exactly_one_call() {
    let h = harness(Some(CountingRegistry::with(&[("Alpha Ltd", "1")])));
    let run = RunContext::with_budget(1);

    let results = h
        .resolver
        .resolve_batch(
            &[named("Alpha Ltd"), named("Beta Ltd"), named("Gamma Ltd")],
            &run,
        )
        .await;

    assert_eq!(h.registry.calls(), 1);
    assert_eq!(results[0].company_id, "1");
    assert_eq!(results[0].source, ResolutionSource::ExternalApi);
    assert_eq!(results[0].confidence, EXTERNAL_MATCH_CONFIDENCE);
    assert_eq!(
        results[0].decision_path.to_string(),
        "override:MISS→cache:MISS→existing:MISS→external:HIT"
    );
    for result in &results[1..] {
        assert_eq!(result.source, ResolutionSource::TempId);
    }

    let stats = run.statistics();
    assert_eq!(stats.external_calls, 1);
    assert_eq!(stats.external_budget_exhausted, 2);
    assert_eq!(stats.budget_remaining, 0);
    assert_eq!(stats.hits.temp_id_hits, 2);
    assert_eq!(stats.backflow_writes, 1);
}

#[tokio::test]
async fn scenario_existing_identifier_passes_through_and_backflows() {
    let h = harness(None);
    let run = RunContext::with_budget(5);

    let result = h
        .resolver
        .resolve(&named("Group Y").with_company_id("999000111"), &run)
        .await;

    assert_eq!(result.company_id, "999000111");
    assert_eq!(result.source, ResolutionSource::ExistingColumn);
    assert_eq!(
        result.decision_path.to_string(),
        "override:MISS→cache:SKIP→existing:HIT"
    );
    assert_eq!(h.cache.write_count(), 1);
    assert_eq!(h.cache.lookup_calls(), 0);
    let row = h
        .cache
        .get(&LookupKey::new(LookupType::CustomerName, "group y"))
        .unwrap();
    assert_eq!(row.company_id, "999000111");
    assert_eq!(row.source, ResolutionSource::ExistingColumn);
    assert_eq!(h.registry.calls(), 0);
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[tokio::test]
async fn duplicate_names_make_one_external_call() {
    let h = harness(Some(CountingRegistry::default()));
    let run = RunContext::with_budget(10);

    let results = h
        .resolver
        .resolve_batch(
            &[named("Delta Ltd"), named("DELTA LTD"), named("Delta Ltd (closed)")],
            &run,
        )
        .await;

    assert_eq!(h.registry.calls(), 1);
    assert!(results.iter().all(|r| r.company_id == results[0].company_id));
    let stats = run.statistics();
    assert_eq!(stats.external_deduplicated, 2);
    assert_eq!(stats.temp_ids_generated, 1);
}

#[tokio::test]
async fn registry_failures_fall_through_to_temp_id() {
    let h = harness(Some(CountingRegistry::failing()));
    let run = RunContext::with_budget(3);

    let result = h.resolver.resolve(&named("Epsilon Ltd"), &run).await;

    assert_eq!(result.source, ResolutionSource::TempId);
    assert_eq!(h.registry.calls(), 1);
    assert_eq!(run.statistics().external_failures, 1);
}

#[tokio::test]
async fn every_request_gets_an_identifier() {
    let h = harness(None);
    let run = RunContext::default();
    let requests = vec![
        ResolutionRequest::default(),
        named(""),
        named("(closed)"),
        ResolutionRequest::default().with_account_number("  "),
        ResolutionRequest::default().with_company_id(" "),
        ResolutionRequest::default().with_plan_code("UNKNOWN"),
    ];

    let results = h.resolver.resolve_batch(&requests, &run).await;

    assert_eq!(results.len(), requests.len());
    assert!(results.iter().all(|r| !r.company_id.is_empty()));
    assert_eq!(run.statistics().hits.total(), requests.len() as u64);
}

#[tokio::test]
async fn batch_matches_one_at_a_time() {
    let requests = vec![
        named("Zeta Ltd").with_company_id("42"),
        named("zeta ltd"),
        named("Alpha Ltd"),
        named("alpha ltd (dormant)"),
        ResolutionRequest::default().with_plan_code("FP0001"),
        named("Pinned Corp"),
        named("Omega Ltd"),
    ];
    let registry = || CountingRegistry::with(&[("Alpha Ltd", "1")]);

    let batched = harness(Some(registry()));
    let batch_run = RunContext::with_budget(5);
    let batch_results = batched.resolver.resolve_batch(&requests, &batch_run).await;

    let single = harness(Some(registry()));
    let single_run = RunContext::with_budget(5);
    let mut single_results = Vec::new();
    for request in &requests {
        single_results.push(single.resolver.resolve(request, &single_run).await);
    }

    assert_eq!(batch_results, single_results);
    assert_eq!(batched.registry.calls(), single.registry.calls());
    assert_eq!(batch_results[1].company_id, "42");
    assert_eq!(batch_results[3].source, ResolutionSource::DbCache);
}

#[tokio::test]
async fn backflow_never_lowers_stored_confidence() {
    let h = harness(None);
    let key = LookupKey::new(LookupType::CustomerName, "theta ltd");
    h.cache
        .upsert(&Resolution::new(
            key.clone(),
            "high",
            1.0,
            ResolutionSource::Override,
        ))
        .await
        .unwrap();
    h.cache
        .upsert(&Resolution::new(
            key.clone(),
            "low",
            0.2,
            ResolutionSource::ExternalApi,
        ))
        .await
        .unwrap();

    let row = h.cache.get(&key).unwrap();
    assert_eq!(row.confidence, 1.0);
    assert_eq!(row.company_id, "high");
    assert_eq!(row.source, ResolutionSource::Override);
    assert_eq!(row.hit_count, 2);
}

#[tokio::test]
async fn run_statistics_account_for_every_tier() {
    let h = harness(Some(CountingRegistry::with(&[("Alpha Ltd", "1")])));
    h.cache.seed(Resolution::new(
        LookupKey::new(LookupType::AccountNumber, "ACC-1"),
        "222",
        0.9,
        ResolutionSource::ExternalApi,
    ));
    let run = RunContext::with_budget(2);

    h.resolver
        .resolve_batch(
            &[
                ResolutionRequest::default().with_plan_code("FP0001"),
                ResolutionRequest::default().with_account_number("ACC-1"),
                named("Kappa").with_company_id("333"),
                named("Alpha Ltd"),
                named("Nobody"),
            ],
            &run,
        )
        .await;

    let stats = run.statistics();
    assert_eq!(stats.requests, 5);
    assert_eq!(stats.hits.override_hits, 1);
    assert_eq!(stats.hits.cache_hits, 1);
    assert_eq!(stats.hits.existing_hits, 1);
    assert_eq!(stats.hits.external_hits, 1);
    assert_eq!(stats.hits.temp_id_hits, 1);
    assert_eq!(stats.cache_batches, 1);
    assert_eq!(stats.cache_skipped, 1);
    assert_eq!(stats.external_calls, 2);
    assert_eq!(stats.external_no_match, 1);
    assert_eq!(stats.backflow_writes, 2);
}

#[tokio::test]
async fn cache_outage_falls_through_to_later_tiers() {
    let requests = [
        named("Zeta Ltd").with_company_id("42"),
        named("Alpha Ltd"),
        named("Nobody"),
    ];

    let healthy = harness(Some(CountingRegistry::with(&[("Alpha Ltd", "1")])));
    let expected = healthy
        .resolver
        .resolve_batch(&requests, &RunContext::with_budget(5))
        .await;

    let cache = Arc::new(UnavailableCache::default());
    let registry = Arc::new(CountingRegistry::with(&[("Alpha Ltd", "1")]));
    let resolver = Resolver::new(
        Arc::new(StaticOverrideStore::load_from_str(OVERRIDES).unwrap()),
        cache.clone(),
        Some(ExternalLookupClient::new(registry.clone())),
        TempIdGenerator::new(SALT).unwrap(),
    );
    let run = RunContext::with_budget(5);

    let results = resolver.resolve_batch(&requests, &run).await;
    assert_eq!(results, expected);
    assert_eq!(
        results[1].decision_path.to_string(),
        "override:MISS→cache:MISS→existing:MISS→external:HIT"
    );
    assert_eq!(results[2].source, ResolutionSource::TempId);
    assert_eq!(
        results[2].company_id,
        temp_id::generate("nobody", SALT)
    );

    let stats = run.statistics();
    assert_eq!(stats.cache_batches, 1);
    assert_eq!(stats.cache_failures, 1);
    assert_eq!(stats.backflow_writes, 0);
    assert_eq!(stats.backflow_failures, 2);
    assert_eq!(stats.hit_flush_failures, 1);

    // the failed writes still reach later rows of the same run
    let later = resolver
        .resolve_batch(&[named("Zeta Ltd (closed)"), named("ALPHA LTD")], &run)
        .await;
    assert_eq!(later[0].company_id, "42");
    assert_eq!(later[1].company_id, "1");
    for result in &later {
        assert_eq!(result.source, ResolutionSource::DbCache);
        assert_eq!(result.decision_path.to_string(), "override:MISS→cache:HIT");
    }
    assert_eq!(registry.calls(), 1);

    let stats = run.statistics();
    assert_eq!(stats.cache_failures, 2);
    assert_eq!(stats.backflow_failures, 2);
    assert_eq!(stats.hit_flush_failures, 2);
    assert_eq!(cache.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
}
