//! Persistent lookup cache (tier 2)
//!
//! Keyed by `(lookup_type, lookup_key)`. Reads are batched: one call answers
//! every probe of every request. Writes follow the ratchet rule: a stored
//! confidence never goes down, and id/source only move on a strictly higher
//! confidence. Hit counts are advisory and buffered.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::LookupResult;
use crate::types::{LookupKey, NormalizedRequest, Resolution};

pub use memory::InMemoryCacheRepository;
#[cfg(feature = "database")]
pub use postgres::PgCacheRepository;

#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// First hit per request, probing keys in [`LookupType::CACHE_ORDER`].
    ///
    /// Implementations answer the whole slice in a single round trip.
    ///
    /// [`LookupType::CACHE_ORDER`]: crate::types::LookupType::CACHE_ORDER
    async fn batch_lookup(
        &self,
        requests: &[NormalizedRequest],
    ) -> LookupResult<Vec<Option<Resolution>>>;

    /// Ratcheted insert-or-update keyed by `(lookup_type, lookup_key)`
    async fn upsert(&self, resolution: &Resolution) -> LookupResult<()>;

    /// Ratcheted upsert of many rows. Duplicate keys are merged first.
    async fn upsert_many(&self, resolutions: &[Resolution]) -> LookupResult<()> {
        for resolution in merge_by_key(resolutions) {
            self.upsert(&resolution).await?;
        }
        Ok(())
    }

    /// Note a cache hit. Never fails; persisted on the next [`flush_hits`].
    ///
    /// [`flush_hits`]: CacheRepository::flush_hits
    fn record_hit(&self, key: &LookupKey);

    /// Persist buffered hit telemetry, returning how many keys were written.
    async fn flush_hits(&self) -> LookupResult<usize>;
}

/// Collapse rows sharing a key into one, using the ratchet rule.
///
/// Keeps first-seen order so batched statements stay deterministic.
pub fn merge_by_key(resolutions: &[Resolution]) -> Vec<Resolution> {
    let mut order: Vec<LookupKey> = Vec::new();
    let mut merged: HashMap<LookupKey, Resolution> = HashMap::new();
    for resolution in resolutions {
        let key = resolution.key();
        match merged.get_mut(&key) {
            Some(existing) => existing.ratchet(resolution),
            None => {
                order.push(key.clone());
                merged.insert(key, resolution.clone());
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Pending hit counts, drained on flush
#[derive(Debug, Default)]
pub struct HitBuffer {
    pending: Mutex<HashMap<LookupKey, PendingHits>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingHits {
    pub hits: i64,
    pub last_hit_at: DateTime<Utc>,
}

impl HitBuffer {
    pub fn record(&self, key: &LookupKey) {
        let now = Utc::now();
        // a poisoned buffer only loses telemetry
        if let Ok(mut pending) = self.pending.lock() {
            let entry = pending.entry(key.clone()).or_insert(PendingHits {
                hits: 0,
                last_hit_at: now,
            });
            entry.hits += 1;
            entry.last_hit_at = now;
        }
    }

    pub fn drain(&self) -> Vec<(LookupKey, PendingHits)> {
        match self.pending.lock() {
            Ok(mut pending) => {
                let mut drained: Vec<_> = pending.drain().collect();
                drained.sort_by(|a, b| a.0.cmp(&b.0));
                drained
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
