//! Resolver configuration
//!
//! Read from `COMPANY_RESOLVER_*` environment variables (a `.env` file is
//! honoured by the binary via `dotenvy`). Secrets are redacted in `Debug`.

use std::fmt;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};
use crate::overrides::StaticOverrideStore;
use crate::temp_id::TempIdGenerator;

pub const DEFAULT_CACHE_TABLE: &str = "enrichment.company_id_cache";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.example.com/api/v1";

pub const ENV_SALT: &str = "COMPANY_RESOLVER_SALT";
pub const ENV_OVERRIDES: &str = "COMPANY_RESOLVER_OVERRIDES";
pub const ENV_CACHE_TABLE: &str = "COMPANY_RESOLVER_CACHE_TABLE";
pub const ENV_EXTERNAL_ENABLED: &str = "COMPANY_RESOLVER_EXTERNAL_ENABLED";
pub const ENV_EXTERNAL_BUDGET: &str = "COMPANY_RESOLVER_EXTERNAL_BUDGET";
pub const ENV_REGISTRY_URL: &str = "COMPANY_RESOLVER_REGISTRY_URL";
pub const ENV_REGISTRY_TOKEN: &str = "COMPANY_RESOLVER_REGISTRY_TOKEN";
pub const ENV_REGISTRY_TIMEOUT: &str = "COMPANY_RESOLVER_REGISTRY_TIMEOUT_SECS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// String that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Candidates requested per search
    pub page_size: usize,
    /// Minimum spacing between registry requests
    pub min_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout_secs: 10,
            page_size: 5,
            min_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalConfig {
    pub enabled: bool,
    /// Registry calls allowed per run; 0 disables the tier
    pub budget: u32,
    /// Bearer credential supplied by the auth collaborator
    pub token: Option<Secret>,
    pub registry: RegistryConfig,
}

impl ExternalConfig {
    /// Whether a run should get a live registry client at all
    pub fn is_active(&self) -> bool {
        self.enabled && self.budget > 0 && self.token.is_some()
    }

    /// Budget to hand a new run; zero whenever the tier is inactive
    pub fn run_budget(&self) -> u32 {
        if self.is_active() {
            self.budget
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub salt: Secret,
    pub overrides_path: Option<PathBuf>,
    pub cache_table: String,
    pub database_url: Option<Secret>,
    pub external: ExternalConfig,
}

impl ResolverConfig {
    /// Minimal config: salt only, everything else defaulted
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: Secret::new(salt),
            overrides_path: None,
            cache_table: DEFAULT_CACHE_TABLE.to_string(),
            database_url: None,
            external: ExternalConfig::default(),
        }
    }

    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let salt = var(ENV_SALT).ok_or(ConfigError::MissingSalt)?;
        let mut config = Self::new(salt);

        config.overrides_path = var(ENV_OVERRIDES).map(PathBuf::from);
        if let Some(table) = var(ENV_CACHE_TABLE) {
            config.cache_table = table;
        }
        config.database_url = var(ENV_DATABASE_URL).map(Secret::new);

        if let Some(enabled) = var(ENV_EXTERNAL_ENABLED) {
            config.external.enabled = parse_bool(ENV_EXTERNAL_ENABLED, &enabled)?;
        }
        if let Some(budget) = var(ENV_EXTERNAL_BUDGET) {
            config.external.budget = parse_num(ENV_EXTERNAL_BUDGET, &budget)?;
        }
        config.external.token = var(ENV_REGISTRY_TOKEN).map(Secret::new);
        if let Some(url) = var(ENV_REGISTRY_URL) {
            config.external.registry.base_url = url;
        }
        if let Some(timeout) = var(ENV_REGISTRY_TIMEOUT) {
            config.external.registry.timeout_secs = parse_num(ENV_REGISTRY_TIMEOUT, &timeout)?;
        }

        // fail at startup, not on first fallback
        config.temp_id_generator()?;
        Ok(config)
    }

    pub fn temp_id_generator(&self) -> ConfigResult<TempIdGenerator> {
        TempIdGenerator::new(self.salt.expose())
    }

    /// Load the configured override store. No configured source is fatal.
    pub fn load_overrides(&self) -> ConfigResult<StaticOverrideStore> {
        let path = self
            .overrides_path
            .as_deref()
            .ok_or(ConfigError::OverrideSourceNotConfigured)?;
        StaticOverrideStore::load_from_file(path)
    }
}

fn parse_bool(var: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}
