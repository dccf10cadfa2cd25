//! In-process cache repository
//!
//! Same ratchet semantics as the Postgres store. Used by tests and by runs
//! with no database configured.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{merge_by_key, CacheRepository, HitBuffer};
use crate::error::LookupResult;
use crate::types::{LookupKey, NormalizedRequest, Resolution};

#[derive(Debug, Default)]
pub struct InMemoryCacheRepository {
    rows: RwLock<HashMap<LookupKey, Resolution>>,
    hits: HitBuffer,
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // a panicked writer leaves whole rows behind, never half-ratcheted ones
    fn read(&self) -> RwLockReadGuard<'_, HashMap<LookupKey, Resolution>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LookupKey, Resolution>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a row verbatim, bypassing the ratchet
    pub fn seed(&self, resolution: Resolution) {
        self.write().insert(resolution.key(), resolution);
    }

    pub fn get(&self, key: &LookupKey) -> Option<Resolution> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `batch_lookup` round trips served
    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of rows written through `upsert`/`upsert_many`
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn apply(&self, rows: &mut HashMap<LookupKey, Resolution>, incoming: &Resolution) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        match rows.get_mut(&incoming.key()) {
            Some(existing) => existing.ratchet(incoming),
            None => {
                rows.insert(incoming.key(), incoming.clone());
            }
        }
    }
}

#[async_trait]
impl CacheRepository for InMemoryCacheRepository {
    async fn batch_lookup(
        &self,
        requests: &[NormalizedRequest],
    ) -> LookupResult<Vec<Option<Resolution>>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let rows = self.read();
        Ok(requests
            .iter()
            .map(|req| {
                req.cache_keys()
                    .iter()
                    .find_map(|key| rows.get(key).cloned())
            })
            .collect())
    }

    async fn upsert(&self, resolution: &Resolution) -> LookupResult<()> {
        self.apply(&mut self.write(), resolution);
        Ok(())
    }

    async fn upsert_many(&self, resolutions: &[Resolution]) -> LookupResult<()> {
        let mut rows = self.write();
        for resolution in merge_by_key(resolutions) {
            self.apply(&mut rows, &resolution);
        }
        Ok(())
    }

    fn record_hit(&self, key: &LookupKey) {
        self.hits.record(key);
    }

    async fn flush_hits(&self) -> LookupResult<usize> {
        let pending = self.hits.drain();
        let mut rows = self.write();
        let mut written = 0;
        for (key, hits) in pending {
            if let Some(row) = rows.get_mut(&key) {
                row.hit_count += hits.hits;
                row.last_hit_at = row.last_hit_at.max(hits.last_hit_at);
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizationService;
    use crate::types::{LookupType, ResolutionRequest, ResolutionSource};

    fn req(r: ResolutionRequest) -> NormalizedRequest {
        NormalizedRequest::from_request(&r, &NormalizationService::new())
    }

    #[tokio::test]
    async fn test_batch_lookup_probe_order() {
        let repo = InMemoryCacheRepository::new();
        repo.seed(Resolution::new(
            LookupKey::new(LookupType::CustomerName, "group x"),
            "111111111",
            0.9,
            ResolutionSource::ExternalApi,
        ));
        repo.seed(Resolution::new(
            LookupKey::new(LookupType::PlanCode, "FP0009"),
            "222222222",
            1.0,
            ResolutionSource::ExistingColumn,
        ));

        let results = repo
            .batch_lookup(&[
                req(ResolutionRequest::default().with_customer_name("Group X")),
                req(ResolutionRequest::default()
                    .with_customer_name("Group X")
                    .with_plan_code("FP0009")),
                req(ResolutionRequest::default().with_customer_name("Nobody")),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().company_id, "111111111");
        assert_eq!(results[1].as_ref().unwrap().company_id, "222222222");
        assert!(results[2].is_none());
        assert_eq!(repo.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn test_upsert_ratchet() {
        let repo = InMemoryCacheRepository::new();
        let key = LookupKey::new(LookupType::CustomerName, "group x");
        repo.upsert(&Resolution::new(
            key.clone(),
            "111",
            0.9,
            ResolutionSource::ExternalApi,
        ))
        .await
        .unwrap();
        repo.upsert(&Resolution::new(
            key.clone(),
            "222",
            0.4,
            ResolutionSource::ExistingColumn,
        ))
        .await
        .unwrap();

        let row = repo.get(&key).unwrap();
        assert_eq!(row.confidence, 0.9);
        assert_eq!(row.source, ResolutionSource::ExternalApi);
        assert_eq!(row.company_id, "111");
        assert_eq!(row.hit_count, 2);
    }

    #[tokio::test]
    async fn test_flush_hits_updates_existing_rows_only() {
        let repo = InMemoryCacheRepository::new();
        let key = LookupKey::new(LookupType::PlanCode, "FP0001");
        repo.seed(Resolution::new(
            key.clone(),
            "1",
            1.0,
            ResolutionSource::ExistingColumn,
        ));
        repo.record_hit(&key);
        repo.record_hit(&LookupKey::new(LookupType::PlanCode, "missing"));

        assert_eq!(repo.flush_hits().await.unwrap(), 1);
        assert_eq!(repo.get(&key).unwrap().hit_count, 2);
    }

    #[tokio::test]
    async fn test_writes_survive_poisoned_lock() {
        let repo = std::sync::Arc::new(InMemoryCacheRepository::new());
        let poisoner = repo.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.rows.write().unwrap();
            panic!("writer panicked while holding the lock");
        })
        .join();
        assert!(repo.rows.is_poisoned());

        let key = LookupKey::new(LookupType::CustomerName, "group x");
        repo.upsert(&Resolution::new(
            key.clone(),
            "111",
            0.9,
            ResolutionSource::ExternalApi,
        ))
        .await
        .unwrap();
        repo.upsert_many(&[Resolution::new(
            key.clone(),
            "222",
            1.0,
            ResolutionSource::ExistingColumn,
        )])
        .await
        .unwrap();

        let row = repo.get(&key).unwrap();
        assert_eq!(row.company_id, "222");
        assert_eq!(row.hit_count, 2);
        assert_eq!(repo.write_count(), 2);
        repo.record_hit(&key);
        assert_eq!(repo.flush_hits().await.unwrap(), 1);
    }
}
