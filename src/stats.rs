//! Per-run resolution statistics

use serde::Serialize;

use crate::types::TierKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierHits {
    pub override_hits: u64,
    pub cache_hits: u64,
    pub existing_hits: u64,
    pub external_hits: u64,
    pub temp_id_hits: u64,
}

impl TierHits {
    pub fn total(&self) -> u64 {
        self.override_hits
            + self.cache_hits
            + self.existing_hits
            + self.external_hits
            + self.temp_id_hits
    }
}

/// Counters for one run, handed to the logging collaborator at the end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStatistics {
    pub requests: u64,
    pub hits: TierHits,
    /// Rows that bypassed the cache batch because they carried an identifier
    pub cache_skipped: u64,
    pub cache_batches: u64,
    pub cache_failures: u64,
    pub external_calls: u64,
    pub external_failures: u64,
    pub external_no_match: u64,
    /// Rows that reached the external tier after the budget ran out
    pub external_budget_exhausted: u64,
    /// Rows answered from an earlier external outcome for the same key
    pub external_deduplicated: u64,
    pub budget_max: u32,
    pub budget_remaining: u32,
    /// Distinct temp-id computations
    pub temp_ids_generated: u64,
    pub backflow_writes: u64,
    pub backflow_failures: u64,
    pub hit_flush_failures: u64,
}

impl ResolutionStatistics {
    pub fn record_hit(&mut self, tier: TierKind) {
        match tier {
            TierKind::Override => self.hits.override_hits += 1,
            TierKind::Cache => self.hits.cache_hits += 1,
            TierKind::Existing => self.hits.existing_hits += 1,
            TierKind::External => self.hits.external_hits += 1,
            TierKind::TempId => self.hits.temp_id_hits += 1,
        }
    }

    pub fn hits_for(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Override => self.hits.override_hits,
            TierKind::Cache => self.hits.cache_hits,
            TierKind::Existing => self.hits.existing_hits,
            TierKind::External => self.hits.external_hits,
            TierKind::TempId => self.hits.temp_id_hits,
        }
    }

    /// Share of rows that ended on a synthetic identifier
    pub fn temp_id_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits.temp_id_hits as f64 / self.requests as f64
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            requests = self.requests,
            override_hits = self.hits.override_hits,
            cache_hits = self.hits.cache_hits,
            existing_hits = self.hits.existing_hits,
            external_hits = self.hits.external_hits,
            temp_id_hits = self.hits.temp_id_hits,
            external_calls = self.external_calls,
            budget_max = self.budget_max,
            budget_remaining = self.budget_remaining,
            temp_ids_generated = self.temp_ids_generated,
            backflow_writes = self.backflow_writes,
            backflow_failures = self.backflow_failures,
            "Company id resolution run complete"
        );
    }
}
