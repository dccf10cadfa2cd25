//! Static overrides (tier 1)
//!
//! Five manually maintained maps, loaded once from YAML and immutable after.
//! Checked in priority order: plan code, account number, hardcoded plan-code
//! special cases, customer name, account name.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::normalize::NormalizationService;
use crate::types::NormalizedRequest;

/// Override file layout; every map is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    #[serde(default)]
    pub plan_code: HashMap<String, String>,
    #[serde(default)]
    pub account_number: HashMap<String, String>,
    #[serde(default)]
    pub hardcode: HashMap<String, String>,
    #[serde(default)]
    pub customer_name: HashMap<String, String>,
    #[serde(default)]
    pub account_name: HashMap<String, String>,
}

/// Override hit
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideMatch {
    pub company_id: String,
    /// Which map produced the hit
    pub map: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct StaticOverrideStore {
    plan_code: HashMap<String, String>,
    account_number: HashMap<String, String>,
    hardcode: HashMap<String, String>,
    customer_name: HashMap<String, String>,
    account_name: HashMap<String, String>,
}

impl StaticOverrideStore {
    /// Load from a YAML file. A missing or malformed file is fatal.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::MissingOverrideSource {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::OverrideIo {
            path: path.display().to_string(),
            source: e,
        })?;
        let store = Self::load_from_str(&content)?;
        tracing::info!(path = %path.display(), entries = store.len(), "Loaded static overrides");
        Ok(store)
    }

    pub fn load_from_str(yaml: &str) -> ConfigResult<Self> {
        // an empty document is a valid (empty) override set
        let config: OverrideConfig = if yaml.trim().is_empty() {
            OverrideConfig::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| ConfigError::InvalidOverrideSource(e.to_string()))?
        };
        Self::from_config(config, &NormalizationService::new())
    }

    /// Build from parsed maps. Keys are trimmed; customer names are normalized.
    pub fn from_config(
        config: OverrideConfig,
        normalizer: &NormalizationService,
    ) -> ConfigResult<Self> {
        Ok(Self {
            plan_code: prepare("plan_code", config.plan_code, |k| k.trim().to_string())?,
            account_number: prepare("account_number", config.account_number, |k| {
                k.trim().to_string()
            })?,
            hardcode: prepare("hardcode", config.hardcode, |k| k.trim().to_string())?,
            customer_name: prepare("customer_name", config.customer_name, |k| {
                normalizer.normalize(k)
            })?,
            account_name: prepare("account_name", config.account_name, |k| {
                k.trim().to_string()
            })?,
        })
    }

    pub fn len(&self) -> usize {
        self.plan_code.len()
            + self.account_number.len()
            + self.hardcode.len()
            + self.customer_name.len()
            + self.account_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First hit across the five maps, in priority order
    pub fn lookup(&self, request: &NormalizedRequest) -> Option<OverrideMatch> {
        let probes: [(&'static str, &HashMap<String, String>, Option<&String>); 5] = [
            ("plan_code", &self.plan_code, request.plan_code.as_ref()),
            (
                "account_number",
                &self.account_number,
                request.account_number.as_ref(),
            ),
            ("hardcode", &self.hardcode, request.plan_code.as_ref()),
            (
                "customer_name",
                &self.customer_name,
                request.customer_name.as_ref(),
            ),
            ("account_name", &self.account_name, request.account_name.as_ref()),
        ];

        probes.into_iter().find_map(|(map, table, key)| {
            table.get(key?).map(|id| OverrideMatch {
                company_id: id.clone(),
                map,
            })
        })
    }
}

fn prepare(
    map: &str,
    raw: HashMap<String, String>,
    key_fn: impl Fn(&str) -> String,
) -> ConfigResult<HashMap<String, String>> {
    let mut out = HashMap::with_capacity(raw.len());
    for (key, id) in raw {
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::EmptyOverrideId {
                map: map.to_string(),
                key,
            });
        }
        let prepared = key_fn(&key);
        if prepared.is_empty() {
            tracing::warn!(map, key = %key, "Override key is blank after preparation, skipping");
            continue;
        }
        out.insert(prepared, id);
    }
    Ok(out)
}
