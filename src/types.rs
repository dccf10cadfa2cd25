//! Core data model: lookup keys, persisted resolutions, requests and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::normalize::NormalizationService;

/// Kind of key a cached resolution is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupType {
    PlanCode,
    AccountName,
    AccountNumber,
    CustomerName,
    PlanCustomer,
}

impl LookupType {
    /// Cache probe order for a single request
    pub const CACHE_ORDER: [LookupType; 5] = [
        LookupType::PlanCode,
        LookupType::AccountName,
        LookupType::AccountNumber,
        LookupType::CustomerName,
        LookupType::PlanCustomer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupType::PlanCode => "PLAN_CODE",
            LookupType::AccountName => "ACCOUNT_NAME",
            LookupType::AccountNumber => "ACCOUNT_NUMBER",
            LookupType::CustomerName => "CUSTOMER_NAME",
            LookupType::PlanCustomer => "PLAN_CUSTOMER",
        }
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLAN_CODE" => Ok(LookupType::PlanCode),
            "ACCOUNT_NAME" => Ok(LookupType::AccountName),
            "ACCOUNT_NUMBER" => Ok(LookupType::AccountNumber),
            "CUSTOMER_NAME" => Ok(LookupType::CustomerName),
            "PLAN_CUSTOMER" => Ok(LookupType::PlanCustomer),
            other => Err(other.to_string()),
        }
    }
}

/// `(lookup_type, key)` pair; the cache's primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupKey {
    pub lookup_type: LookupType,
    pub key: String,
}

impl LookupKey {
    pub fn new(lookup_type: LookupType, key: impl Into<String>) -> Self {
        Self {
            lookup_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lookup_type, self.key)
    }
}

/// Where a company id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Override,
    DbCache,
    ExistingColumn,
    ExternalApi,
    TempId,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Override => "override",
            ResolutionSource::DbCache => "db_cache",
            ResolutionSource::ExistingColumn => "existing_column",
            ResolutionSource::ExternalApi => "external_api",
            ResolutionSource::TempId => "temp_id",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override" => Ok(ResolutionSource::Override),
            "db_cache" => Ok(ResolutionSource::DbCache),
            "existing_column" => Ok(ResolutionSource::ExistingColumn),
            "external_api" => Ok(ResolutionSource::ExternalApi),
            "temp_id" => Ok(ResolutionSource::TempId),
            other => Err(other.to_string()),
        }
    }
}

/// A persisted cache row. At most one per `(lookup_type, lookup_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub lookup_type: LookupType,
    pub lookup_key: String,
    pub company_id: String,
    pub confidence: f64,
    pub source: ResolutionSource,
    pub hit_count: i64,
    pub last_hit_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resolution {
    /// Fresh row as written by a backflow; counts as one hit.
    pub fn new(
        key: LookupKey,
        company_id: impl Into<String>,
        confidence: f64,
        source: ResolutionSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            lookup_type: key.lookup_type,
            lookup_key: key.key,
            company_id: company_id.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            hit_count: 1,
            last_hit_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> LookupKey {
        LookupKey::new(self.lookup_type, self.lookup_key.clone())
    }

    /// Fold `incoming` into this row using the ratchet rule.
    ///
    /// Confidence becomes the max of both; id and source move only on a
    /// strictly higher confidence. Hit telemetry always accumulates.
    pub fn ratchet(&mut self, incoming: &Resolution) {
        if incoming.confidence > self.confidence {
            self.confidence = incoming.confidence;
            self.company_id = incoming.company_id.clone();
            self.source = incoming.source;
        }
        self.hit_count += incoming.hit_count;
        self.last_hit_at = self.last_hit_at.max(incoming.last_hit_at);
        self.updated_at = self.updated_at.max(incoming.updated_at);
    }
}

/// One input row, as handed over by the row-processing pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    #[serde(default)]
    pub plan_code: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Identifier already present on the row, trusted as-is
    #[serde(default)]
    pub company_id: Option<String>,
}

impl ResolutionRequest {
    pub fn with_plan_code(mut self, v: impl Into<String>) -> Self {
        self.plan_code = Some(v.into());
        self
    }

    pub fn with_account_name(mut self, v: impl Into<String>) -> Self {
        self.account_name = Some(v.into());
        self
    }

    pub fn with_account_number(mut self, v: impl Into<String>) -> Self {
        self.account_number = Some(v.into());
        self
    }

    pub fn with_customer_name(mut self, v: impl Into<String>) -> Self {
        self.customer_name = Some(v.into());
        self
    }

    pub fn with_company_id(mut self, v: impl Into<String>) -> Self {
        self.company_id = Some(v.into());
        self
    }
}

/// Raw keys are trimmed; blank means absent.
pub(crate) fn raw_key(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A request with its keys prepared for every tier
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub plan_code: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    /// Normalized customer name
    pub customer_name: Option<String>,
    /// Normalized account name, used for registry search when no customer name is present
    pub account_name_normalized: Option<String>,
    pub existing_company_id: Option<String>,
}

impl NormalizedRequest {
    pub fn from_request(request: &ResolutionRequest, normalizer: &NormalizationService) -> Self {
        Self {
            plan_code: raw_key(request.plan_code.as_deref()),
            account_name: raw_key(request.account_name.as_deref()),
            account_number: raw_key(request.account_number.as_deref()),
            customer_name: normalizer.normalize_opt(request.customer_name.as_deref()),
            account_name_normalized: normalizer.normalize_opt(request.account_name.as_deref()),
            existing_company_id: raw_key(request.company_id.as_deref()),
        }
    }

    /// Cache keys in probe order; absent fields are skipped
    pub fn cache_keys(&self) -> Vec<LookupKey> {
        LookupType::CACHE_ORDER
            .iter()
            .filter_map(|t| self.key_for(*t))
            .collect()
    }

    pub fn key_for(&self, lookup_type: LookupType) -> Option<LookupKey> {
        let key = match lookup_type {
            LookupType::PlanCode => self.plan_code.clone(),
            LookupType::AccountName => self.account_name.clone(),
            LookupType::AccountNumber => self.account_number.clone(),
            LookupType::CustomerName => self.customer_name.clone(),
            LookupType::PlanCustomer => match (&self.plan_code, &self.customer_name) {
                (Some(plan), Some(name)) => Some(format!("{plan}|{name}")),
                _ => None,
            },
        }?;
        Some(LookupKey::new(lookup_type, key))
    }

    /// Key a tier-2+ discovery is written back under
    pub fn backflow_key(&self) -> Option<LookupKey> {
        [
            LookupType::CustomerName,
            LookupType::AccountName,
            LookupType::AccountNumber,
            LookupType::PlanCode,
        ]
        .iter()
        .find_map(|t| self.key_for(*t))
    }

    /// Name sent to the registry search
    pub fn registry_name(&self) -> Option<&str> {
        self.customer_name
            .as_deref()
            .or(self.account_name_normalized.as_deref())
    }

    /// Input to the fallback identifier; stable for a given row shape
    pub fn fallback_key(&self) -> String {
        if let Some(name) = self.registry_name() {
            return name.to_string();
        }
        if let Some(acct) = &self.account_number {
            return format!("account_number:{acct}");
        }
        if let Some(plan) = &self.plan_code {
            return format!("plan_code:{plan}");
        }
        String::new()
    }
}

/// The five lookup tiers, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Override,
    Cache,
    Existing,
    External,
    TempId,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Override => "override",
            TierKind::Cache => "cache",
            TierKind::Existing => "existing",
            TierKind::External => "external",
            TierKind::TempId => "temp_id",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Hit,
    Miss,
    Skip,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Hit => "HIT",
            Verdict::Miss => "MISS",
            Verdict::Skip => "SKIP",
        })
    }
}

/// Ordered record of every tier a request passed through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionPath(Vec<(TierKind, Verdict)>);

impl DecisionPath {
    pub fn push(&mut self, tier: TierKind, verdict: Verdict) {
        self.0.push((tier, verdict));
    }

    pub fn steps(&self) -> &[(TierKind, Verdict)] {
        &self.0
    }
}

impl fmt::Display for DecisionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (tier, verdict)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("→")?;
            }
            write!(f, "{tier}:{verdict}")?;
        }
        Ok(())
    }
}

impl Serialize for DecisionPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome for one request. `company_id` is always populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub company_id: String,
    pub matched_tier: TierKind,
    pub source: ResolutionSource,
    pub confidence: f64,
    pub decision_path: DecisionPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(req: ResolutionRequest) -> NormalizedRequest {
        NormalizedRequest::from_request(&req, &NormalizationService::new())
    }

    #[test]
    fn test_cache_keys_order_and_composite() {
        let req = normalized(
            ResolutionRequest::default()
                .with_customer_name(" Group X ")
                .with_plan_code("FP0001")
                .with_account_number("  "),
        );
        let keys = req.cache_keys();
        assert_eq!(
            keys,
            vec![
                LookupKey::new(LookupType::PlanCode, "FP0001"),
                LookupKey::new(LookupType::CustomerName, "group x"),
                LookupKey::new(LookupType::PlanCustomer, "FP0001|group x"),
            ]
        );
    }

    #[test]
    fn test_backflow_and_fallback_keys() {
        let req = normalized(ResolutionRequest::default().with_account_number("A-1"));
        assert_eq!(
            req.backflow_key(),
            Some(LookupKey::new(LookupType::AccountNumber, "A-1"))
        );
        assert_eq!(req.fallback_key(), "account_number:A-1");
        assert_eq!(normalized(ResolutionRequest::default()).fallback_key(), "");
    }

    #[test]
    fn test_ratchet_never_lowers_confidence() {
        let key = LookupKey::new(LookupType::CustomerName, "group x");
        let mut stored = Resolution::new(key.clone(), "111", 0.9, ResolutionSource::ExternalApi);
        stored.ratchet(&Resolution::new(
            key.clone(),
            "222",
            0.5,
            ResolutionSource::ExistingColumn,
        ));
        assert_eq!(stored.company_id, "111");
        assert_eq!(stored.confidence, 0.9);
        assert_eq!(stored.source, ResolutionSource::ExternalApi);
        assert_eq!(stored.hit_count, 2);

        stored.ratchet(&Resolution::new(key, "333", 1.0, ResolutionSource::ExistingColumn));
        assert_eq!(stored.company_id, "333");
        assert_eq!(stored.source, ResolutionSource::ExistingColumn);
        assert_eq!(stored.hit_count, 3);
    }

    #[test]
    fn test_decision_path_rendering() {
        let mut path = DecisionPath::default();
        path.push(TierKind::Override, Verdict::Miss);
        path.push(TierKind::Cache, Verdict::Skip);
        path.push(TierKind::Existing, Verdict::Hit);
        assert_eq!(path.to_string(), "override:MISS→cache:SKIP→existing:HIT");
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            "\"override:MISS→cache:SKIP→existing:HIT\""
        );
    }

    #[test]
    fn test_request_deserializes_with_missing_fields() {
        let req: ResolutionRequest =
            serde_json::from_str(r#"{"customer_name": "Group X"}"#).unwrap();
        assert_eq!(req.customer_name.as_deref(), Some("Group X"));
        assert!(req.plan_code.is_none());
    }
}
