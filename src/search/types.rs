use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::{catalog::CatalogError, store::StoreError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("catalog read failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("search store failed: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode index record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One searchable model, denormalized with its brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub id: String,
    pub name: String,
    pub brand_name: String,
    pub brand_slug: String,
    pub model_slug: String,
    pub slug: String,
    pub hero_image: Option<String>,
}

/// Describes the index generation last written. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    #[serde(with = "time::serde::rfc3339")]
    pub last_build: OffsetDateTime,
    pub model_count: usize,
    pub brand_count: usize,
    pub version: String,
}

impl IndexMeta {
    pub fn age(&self) -> Duration {
        (OffsetDateTime::now_utc() - self.last_build).unsigned_abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Memory,
    Redis,
    /// Answered from the catalog because no index existed.
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<SearchIndexEntry>,
    pub source: SearchSource,
    /// Seconds since the index generation that answered was built.
    #[serde(serialize_with = "serialize_age")]
    pub index_age: Option<Duration>,
}

fn serialize_age<S: serde::Serializer>(
    age: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match age {
        Some(age) => serializer.serialize_some(&age.as_secs()),
        None => serializer.serialize_none(),
    }
}

/// Result of a query. `Unavailable` means no index exists anywhere and the
/// caller must query the catalog itself; it is not an empty result.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(SearchResults),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub models: usize,
    pub brands: usize,
    pub terms: usize,
    /// Whether the distributed copy was rewritten.
    pub stored: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built(BuildReport),
    AlreadyRunning,
}
