//! Enterprise registry integration (tier 3)
//!
//! This module provides:
//! - Response types for the registry search endpoint
//! - An HTTP transport behind the [`RegistrySearch`] seam
//! - [`ExternalLookupClient`], which gates every call on the run budget and
//!   degrades all failures to a miss

pub mod client;
pub mod types;

pub use client::{
    ExternalLookupClient, ExternalMatch, ExternalOutcome, HttpRegistrySearch, RegistrySearch,
    EXTERNAL_MATCH_CONFIDENCE,
};
pub use types::*;
