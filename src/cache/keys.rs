//! Cache key construction.
//!
//! Response keys have the shape
//! `cache:{version}:{namespace}:{path}:{canonical-query}`. Bumping the
//! version makes every entry written in an older format miss.

use axum::http::Uri;
use url::form_urlencoded;

pub const CACHE_PREFIX: &str = "cache";
pub const LOCK_PREFIX: &str = "lock";

const ROOT_NAMESPACE: &str = "root";

/// Build a response-cache key. Equivalent query strings produce the same key
/// regardless of parameter order.
pub fn build_key(version: &str, namespace: &str, path: &str, query: &str) -> String {
    format!(
        "{CACHE_PREFIX}:{version}:{namespace}:{path}:{}",
        canonical_query(query)
    )
}

/// Key of the refill lock guarding `cache_key`.
pub fn lock_key(cache_key: &str) -> String {
    format!("{LOCK_PREFIX}:{cache_key}")
}

/// Sort decoded query pairs by key then value and re-encode them.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// First path segment below `api_root`, e.g. `cars` for `/api/cars/creta`.
pub fn namespace_for(api_root: &str, path: &str) -> String {
    let root = api_root.trim_end_matches('/');
    let rest = path.strip_prefix(root).unwrap_or(path);

    rest.split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(ROOT_NAMESPACE)
        .to_string()
}

/// Glob matching every response key in `version` whose key contains `fragment`.
pub fn pattern_for(version: &str, fragment: &str) -> String {
    let fragment = fragment.trim_matches('*');
    if fragment.is_empty() {
        format!("{CACHE_PREFIX}:{version}:*")
    } else {
        format!("{CACHE_PREFIX}:{version}:*{fragment}*")
    }
}

/// Derives keys for inbound requests.
#[derive(Debug, Clone)]
pub struct KeyScheme {
    version: String,
    api_root: String,
}

impl KeyScheme {
    pub fn new(version: impl Into<String>, api_root: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            api_root: api_root.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn key_for(&self, uri: &Uri) -> String {
        let path = uri.path();
        let namespace = namespace_for(&self.api_root, path);
        build_key(&self.version, &namespace, path, uri.query().unwrap_or(""))
    }
}
