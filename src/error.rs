//! Error types for the resolver
//!
//! Only [`ConfigError`] is ever surfaced to callers, and only at startup.
//! [`LookupError`] is absorbed by the tier that hit it and turned into a miss.

use thiserror::Error;

/// Startup-time configuration failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Override source not found: {path}")]
    MissingOverrideSource { path: String },

    #[error("No override source configured (set COMPANY_RESOLVER_OVERRIDES or pass --overrides)")]
    OverrideSourceNotConfigured,

    #[error("Failed to read override source {path}: {source}")]
    OverrideIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid override source: {0}")]
    InvalidOverrideSource(String),

    #[error("Empty company id for key '{key}' in override map '{map}'")]
    EmptyOverrideId { map: String, key: String },

    #[error("Temp-id salt is not configured")]
    MissingSalt,

    #[error("Temp-id salt must be at least {min_len} characters")]
    WeakSalt { min_len: usize },

    #[error("Invalid cache table name '{0}': expected [schema.]table with [a-z0-9_] identifiers")]
    InvalidTableName(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid registry base URL '{url}': {reason}")]
    InvalidRegistryUrl { url: String, reason: String },

    #[error("Failed to build registry HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Recoverable failures inside a single tier
#[derive(Error, Debug)]
pub enum LookupError {
    #[cfg(feature = "database")]
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode registry response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unknown {field} value in cache row: '{value}'")]
    CorruptRow { field: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type LookupResult<T> = Result<T, LookupError>;
