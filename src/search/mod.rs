//! Prefix search over the car catalog.
//!
//! The index is built from the catalog at startup and on a timer. It lives
//! in process memory and, when a shared store is available, as
//! `search:data:{id}` records plus `search:term:{term}` postings so other
//! processes can answer before their own first build.

mod index;
mod terms;
mod types;

use std::time::Duration;

use serde::Deserialize;

pub use index::{INDEX_FORMAT_VERSION, SearchIndex, build_entries};
pub use terms::{MIN_TERM_LEN, match_entries, normalize, query_words, terms_for};
pub use types::{
    BuildOutcome, BuildReport, IndexMeta, SearchError, SearchIndexEntry, SearchOutcome,
    SearchResults, SearchSource,
};

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_PREFIX_SCAN_LIMIT: usize = 50;
const DEFAULT_LIMIT: usize = 10;
const DEFAULT_MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Rebuild period; also the lifetime of every `search:*` key.
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
    /// Term keys sampled by a prefix scan against the shared store.
    pub prefix_scan_limit: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            prefix_scan_limit: DEFAULT_PREFIX_SCAN_LIMIT,
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

impl From<&crate::config::SearchSettings> for SearchConfig {
    fn from(settings: &crate::config::SearchSettings) -> Self {
        Self {
            refresh_interval: settings.refresh_interval,
            prefix_scan_limit: settings.prefix_scan_limit.get(),
            default_limit: settings.default_limit.get(),
            max_limit: settings.max_limit.get(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_refresh_is_thirty_minutes() {
        let config = SearchConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(1800));
        assert!(config.default_limit <= config.max_limit);
    }

    #[test]
    fn config_deserializes_seconds() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"refresh_interval": 0, "max_limit": 5}"#).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.max_limit, 5);
        assert_eq!(config.prefix_scan_limit, 50);
    }
}
