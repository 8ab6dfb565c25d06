//! Response cache configuration.
//!
//! Populated from the `[cache]` section of `motorway.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_KEY_VERSION: &str = "v2";
const DEFAULT_API_ROOT: &str = "/api";
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_WAIT_INTERVAL_MS: u64 = 100;
const DEFAULT_WAIT_ATTEMPTS: u32 = 1;
const DEFAULT_REVALIDATE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;
const DEFAULT_HEALTH_MIN_HIT_RATE: f64 = 0.5;
const DEFAULT_HEALTH_MIN_SAMPLES: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and fill the response cache.
    pub enabled: bool,
    /// Format version segment of every response key.
    pub key_version: String,
    /// Path prefix stripped before deriving the key namespace.
    pub api_root: String,
    /// Lifetime of a refill lock.
    pub lock_ttl_secs: u64,
    /// Sleep between re-checks while another filler holds the lock.
    pub wait_interval_ms: u64,
    /// Re-checks before falling back to an unsynchronized fill.
    pub wait_attempts: u32,
    /// Upper bound on a background revalidation request.
    pub revalidate_timeout_secs: u64,
    /// Largest response body that will be buffered and cached.
    pub body_limit_bytes: usize,
    /// Hit rate below which the health endpoint reports `degraded`.
    pub health_min_hit_rate: f64,
    /// Lookups required before the hit rate is judged at all.
    pub health_min_samples: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_version: DEFAULT_KEY_VERSION.to_string(),
            api_root: DEFAULT_API_ROOT.to_string(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            wait_interval_ms: DEFAULT_WAIT_INTERVAL_MS,
            wait_attempts: DEFAULT_WAIT_ATTEMPTS,
            revalidate_timeout_secs: DEFAULT_REVALIDATE_TIMEOUT_SECS,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            health_min_hit_rate: DEFAULT_HEALTH_MIN_HIT_RATE,
            health_min_samples: DEFAULT_HEALTH_MIN_SAMPLES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            key_version: settings.key_version.clone(),
            api_root: settings.api_root.clone(),
            lock_ttl_secs: settings.lock_ttl.as_secs(),
            wait_interval_ms: settings.wait_interval.as_millis() as u64,
            wait_attempts: settings.wait_attempts,
            revalidate_timeout_secs: settings.revalidate_timeout.as_secs(),
            body_limit_bytes: settings.body_limit_bytes.get(),
            health_min_hit_rate: settings.health_min_hit_rate,
            health_min_samples: settings.health_min_samples,
        }
    }
}

impl CacheConfig {
    /// Lock lifetime, clamped to one second.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.max(1))
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    /// Revalidation timeout, clamped to one second.
    pub fn revalidate_timeout(&self) -> Duration {
        Duration::from_secs(self.revalidate_timeout_secs.max(1))
    }

    /// Lifetime of the lock held by a background revalidation. It outlasts
    /// the revalidation timeout so the lock cannot expire under a running
    /// refresh.
    pub fn revalidate_lock_ttl(&self) -> Duration {
        self.revalidate_timeout() + self.lock_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.key_version, "v2");
        assert_eq!(config.api_root, "/api");
        assert_eq!(config.lock_ttl(), Duration::from_secs(10));
        assert_eq!(config.wait_interval(), Duration::from_millis(100));
        assert_eq!(config.wait_attempts, 1);
        assert_eq!(config.revalidate_timeout(), Duration::from_secs(30));
        assert_eq!(config.body_limit_bytes, 1024 * 1024);
    }

    #[test]
    fn zero_durations_clamp() {
        let config = CacheConfig {
            lock_ttl_secs: 0,
            revalidate_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.lock_ttl(), Duration::from_secs(1));
        assert_eq!(config.revalidate_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn revalidation_lock_outlives_timeout() {
        let config = CacheConfig::default();
        assert_eq!(config.revalidate_lock_ttl(), Duration::from_secs(40));
        assert!(config.revalidate_lock_ttl() > config.revalidate_timeout());
    }
}
