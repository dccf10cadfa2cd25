//! Company identifier resolution
//!
//! Resolves noisy company names from spreadsheet-derived rows into stable
//! identifiers usable as join keys, through five tiers:
//!
//! 1. static overrides ([`overrides`])
//! 2. persistent lookup cache ([`cache`]), one batched round trip per batch
//! 3. identifier already present on the row
//! 4. enterprise registry search ([`registry`]), budget-limited
//! 5. deterministic HMAC fallback identifier ([`temp_id`])
//!
//! ```no_run
//! use std::sync::Arc;
//! use company_id_resolver::{
//!     InMemoryCacheRepository, ResolutionRequest, Resolver, RunContext, StaticOverrideStore,
//!     TempIdGenerator,
//! };
//!
//! # async fn demo() -> Result<(), company_id_resolver::ConfigError> {
//! let resolver = Resolver::new(
//!     Arc::new(StaticOverrideStore::load_from_str("plan_code: {FP0001: \"614810477\"}")?),
//!     Arc::new(InMemoryCacheRepository::new()),
//!     None,
//!     TempIdGenerator::new("a-long-lived-secret-salt")?,
//! );
//! let run = RunContext::with_budget(0);
//! let result = resolver
//!     .resolve(&ResolutionRequest::default().with_plan_code("FP0001"), &run)
//!     .await;
//! assert_eq!(result.company_id, "614810477");
//! run.statistics().log_summary();
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod normalize;
pub mod overrides;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod temp_id;
pub mod tiers;
pub mod types;

pub use budget::Budget;
pub use cache::{CacheRepository, InMemoryCacheRepository};
#[cfg(feature = "database")]
pub use cache::PgCacheRepository;
pub use config::ResolverConfig;
pub use context::RunContext;
pub use error::{ConfigError, LookupError};
pub use normalize::NormalizationService;
pub use overrides::StaticOverrideStore;
pub use registry::{ExternalLookupClient, RegistrySearch};
pub use resolver::Resolver;
pub use stats::ResolutionStatistics;
pub use temp_id::TempIdGenerator;
pub use types::{
    DecisionPath, LookupKey, LookupType, Resolution, ResolutionRequest, ResolutionResult,
    ResolutionSource, TierKind,
};
