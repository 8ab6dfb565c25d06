//! Response cache counters.
//!
//! Every outcome is counted twice: in process-local atomics read by the
//! stats and health endpoints, and as a `metrics` counter for exporters.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

const METRIC_CACHE_HIT: &str = "motorway_cache_hit_total";
const METRIC_CACHE_MISS: &str = "motorway_cache_miss_total";
const METRIC_CACHE_STALE: &str = "motorway_cache_stale_total";
const METRIC_CACHE_WAIT_HIT: &str = "motorway_cache_wait_hit_total";
const METRIC_CACHE_BYPASS: &str = "motorway_cache_bypass_total";
const METRIC_CACHE_STORE_ERROR: &str = "motorway_cache_store_error_total";
const METRIC_CACHE_REVALIDATE: &str = "motorway_cache_revalidate_total";

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    wait_hits: AtomicU64,
    bypass: AtomicU64,
    store_errors: AtomicU64,
    revalidations: AtomicU64,
    revalidation_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS).increment(1);
    }

    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_STALE).increment(1);
    }

    pub fn record_wait_hit(&self) {
        self.wait_hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_WAIT_HIT).increment(1);
    }

    pub fn record_bypass(&self) {
        self.bypass.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_BYPASS).increment(1);
    }

    pub fn record_store_error(&self, op: &'static str) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_STORE_ERROR, "op" => op).increment(1);
    }

    pub fn record_revalidation(&self, succeeded: bool) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.revalidation_failures.fetch_add(1, Ordering::Relaxed);
        }
        counter!(
            METRIC_CACHE_REVALIDATE,
            "outcome" => if succeeded { "ok" } else { "error" }
        )
        .increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let stale = self.stale.load(Ordering::Relaxed);
        let wait_hits = self.wait_hits.load(Ordering::Relaxed);

        StatsSnapshot {
            hits,
            misses,
            stale,
            wait_hits,
            bypass: self.bypass.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            revalidation_failures: self.revalidation_failures.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits + stale + wait_hits, misses),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub wait_hits: u64,
    pub bypass: u64,
    pub store_errors: u64,
    pub revalidations: u64,
    pub revalidation_failures: u64,
    pub hit_rate: f64,
}

impl StatsSnapshot {
    /// Lookups that reached the store, served or not.
    pub fn lookups(&self) -> u64 {
        self.hits + self.stale + self.wait_hits + self.misses
    }

    /// Hit-rate verdict; too few lookups always count as healthy.
    pub fn health(&self, min_hit_rate: f64, min_samples: u64) -> CacheHealth {
        if self.lookups() >= min_samples && self.hit_rate < min_hit_rate {
            CacheHealth::Degraded
        } else {
            CacheHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

fn hit_rate(served: u64, misses: u64) -> f64 {
    let total = served + misses;
    if total == 0 {
        0.0
    } else {
        served as f64 / total as f64
    }
}
