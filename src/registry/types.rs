//! Registry search response types
//!
//! `GET {base}/companies/search?name=..&limit=..` returns
//! `{ "data": [ { "id", "name", ... } ], "meta": { ... } }`.

use serde::{Deserialize, Serialize};

/// Top-level API response wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryResponse<T> {
    pub data: T,
    #[serde(default)]
    pub meta: Option<SearchMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
}

/// A company returned by the registry search
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegistryCandidate {
    /// Registry identifier, used as the company id
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "registrationNumber", default)]
    pub registration_number: Option<String>,
    #[serde(rename = "formerNames", default)]
    pub former_names: Vec<String>,
}

impl RegistryCandidate {
    /// Legal name followed by former names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.former_names.iter().map(String::as_str))
    }
}
