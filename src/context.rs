//! Run-scoped state
//!
//! One `RunContext` per pipeline run: created at run start, passed by reference
//! into the resolver, dropped at run end. Holds the budget, statistics, the
//! cache view for the current batch, backflow writes made so far, and per-key
//! memos for the external and temp-id tiers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::budget::Budget;
use crate::registry::ExternalMatch;
use crate::stats::ResolutionStatistics;
use crate::types::{LookupKey, NormalizedRequest, Resolution};

#[derive(Debug)]
pub struct RunContext {
    budget: Budget,
    stats: Mutex<ResolutionStatistics>,
    /// Rows returned by cache batch lookups during this run
    cache_view: Mutex<HashMap<LookupKey, Resolution>>,
    /// Backflow writes made during this run, ratcheted per key
    overlay: Mutex<HashMap<LookupKey, Resolution>>,
    /// Backflow writes not yet flushed to the repository
    pending_backflow: Mutex<Vec<Resolution>>,
    external_memo: Mutex<HashMap<String, Option<ExternalMatch>>>,
    temp_id_memo: Mutex<HashMap<String, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunContext {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            stats: Mutex::new(ResolutionStatistics::default()),
            cache_view: Mutex::new(HashMap::new()),
            overlay: Mutex::new(HashMap::new()),
            pending_backflow: Mutex::new(Vec::new()),
            external_memo: Mutex::new(HashMap::new()),
            temp_id_memo: Mutex::new(HashMap::new()),
        }
    }

    /// Run with the external tier budgeted at `max` calls
    pub fn with_budget(max: u32) -> Self {
        Self::new(Budget::new(max))
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Snapshot of the statistics, budget fields filled in
    pub fn statistics(&self) -> ResolutionStatistics {
        let mut stats = lock(&self.stats).clone();
        stats.budget_max = self.budget.max();
        stats.budget_remaining = self.budget.remaining();
        stats
    }

    pub fn update_stats(&self, f: impl FnOnce(&mut ResolutionStatistics)) {
        f(&mut lock(&self.stats));
    }

    /// Remember rows returned by a cache batch lookup
    pub fn absorb_cache_rows(&self, rows: impl IntoIterator<Item = Resolution>) {
        let mut view = lock(&self.cache_view);
        for row in rows {
            view.insert(row.key(), row);
        }
    }

    /// First cache hit for a request, combining stored rows with this run's writes.
    ///
    /// Per key, the effective row is what the store will hold once pending
    /// backflow lands: the stored row ratcheted with the run's writes.
    pub fn cached(&self, request: &NormalizedRequest) -> Option<Resolution> {
        let view = lock(&self.cache_view);
        let overlay = lock(&self.overlay);
        request.cache_keys().into_iter().find_map(|key| {
            match (view.get(&key), overlay.get(&key)) {
                (Some(stored), Some(written)) => {
                    let mut merged = stored.clone();
                    merged.ratchet(written);
                    Some(merged)
                }
                (Some(stored), None) => Some(stored.clone()),
                (None, Some(written)) => Some(written.clone()),
                (None, None) => None,
            }
        })
    }

    /// Queue a backflow write; visible to `cached` immediately
    pub fn stage_backflow(&self, resolution: Resolution) {
        {
            let mut overlay = lock(&self.overlay);
            match overlay.get_mut(&resolution.key()) {
                Some(existing) => existing.ratchet(&resolution),
                None => {
                    overlay.insert(resolution.key(), resolution.clone());
                }
            }
        }
        lock(&self.pending_backflow).push(resolution);
    }

    pub fn take_pending_backflow(&self) -> Vec<Resolution> {
        std::mem::take(&mut *lock(&self.pending_backflow))
    }

    pub fn external_memo(&self, name: &str) -> Option<Option<ExternalMatch>> {
        lock(&self.external_memo).get(name).cloned()
    }

    pub fn remember_external(&self, name: &str, outcome: Option<ExternalMatch>) {
        lock(&self.external_memo).insert(name.to_string(), outcome);
    }

    /// Temp id for a fallback key, computing it at most once per run
    pub fn temp_id_for(&self, fallback_key: &str, generate: impl FnOnce(&str) -> String) -> String {
        let mut memo = lock(&self.temp_id_memo);
        if let Some(id) = memo.get(fallback_key) {
            return id.clone();
        }
        let id = generate(fallback_key);
        memo.insert(fallback_key.to_string(), id.clone());
        drop(memo);
        self.update_stats(|s| s.temp_ids_generated += 1);
        id
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Budget::disabled())
    }
}
