//! Response cache middleware.
//!
//! Wraps read-only JSON routes. Per request and cache key the flow is:
//!
//! - fresh entry: serve it (`X-Cache: HIT`)
//! - stale entry: serve it (`X-Cache: STALE`) and revalidate in the
//!   background if this process wins the refill lock
//! - no entry: take the refill lock and fill from the handler
//!   (`X-Cache: MISS`); if someone else holds it, wait briefly for their
//!   result (`X-Cache: HIT-AFTER-WAIT`) and fill without the lock if it
//!   still has not appeared
//!
//! Store failures never fail a request. They are logged, counted and the
//! request is answered straight from the handler.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::de::IgnoredAny;
use tracing::{debug, instrument, warn};

use crate::store::{KvStore, StoreError};

use super::{
    CacheConfig,
    keys::KeyScheme,
    lock::DistributedLock,
    refresh::{RevalidationRequest, Revalidator, spawn_revalidation},
    stats::CacheStats,
    store::{Lookup, ResponseStore},
};

pub const CACHE_STATUS_HEADER: &str = "x-cache";
pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";
/// Requests carrying `x-cache-bypass: 1` skip the read path and refill.
pub const BYPASS_HEADER: &str = "x-cache-bypass";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    HitAfterWait,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::HitAfterWait => "HIT-AFTER-WAIT",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Lifetime of entries written by one wrapped route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Remaining lifetime below which an entry is served as stale.
    pub stale: Duration,
}

impl CachePolicy {
    pub fn new(ttl_seconds: u64, stale_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds.max(1)),
            stale: Duration::from_secs(stale_seconds),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(300, 60)
    }
}

/// Process-wide pieces shared by every wrapped route.
pub struct CacheEngine {
    config: CacheConfig,
    responses: ResponseStore,
    lock: DistributedLock,
    revalidator: Arc<dyn Revalidator>,
    stats: Arc<CacheStats>,
}

impl CacheEngine {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KvStore>,
        revalidator: Arc<dyn Revalidator>,
    ) -> Self {
        let keys = KeyScheme::new(config.key_version.clone(), config.api_root.clone());
        Self {
            responses: ResponseStore::new(store.clone(), keys),
            lock: DistributedLock::new(store),
            revalidator,
            stats: Arc::new(CacheStats::new()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn responses(&self) -> &ResponseStore {
        &self.responses
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Middleware state: the shared engine plus the policy of one route group.
#[derive(Clone)]
pub struct CacheState {
    engine: Arc<CacheEngine>,
    policy: CachePolicy,
}

impl CacheState {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self {
            engine,
            policy: CachePolicy::default(),
        }
    }

    /// State for routes cached for `ttl_seconds`, stale for the last
    /// `stale_seconds` of that lifetime.
    pub fn policy(&self, ttl_seconds: u64, stale_seconds: u64) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            policy: CachePolicy::new(ttl_seconds, stale_seconds),
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let engine = cache.engine.as_ref();
    if !engine.config.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = engine.responses.keys().key_for(request.uri());
    let policy = cache.policy;

    if is_bypass(&request) {
        engine.stats.record_bypass();
        debug!(cache = "response", outcome = "bypass", "refilling on request");
        return fill(engine, &key, policy, request, next, CacheStatus::Bypass).await;
    }

    match engine.responses.lookup(&key, policy.stale).await {
        Ok(Lookup::Fresh { body, ttl }) => {
            engine.stats.record_hit();
            debug!(cache = "response", outcome = "hit", "serving cached response");
            return cached_response(body, CacheStatus::Hit, ttl);
        }
        Ok(Lookup::Stale { body, ttl }) => {
            engine.stats.record_stale();
            debug!(cache = "response", outcome = "stale", "serving stale response");
            let path_and_query = path_and_query(request.uri());
            schedule_revalidation(engine, &key, path_and_query).await;
            return cached_response(body, CacheStatus::Stale, Some(ttl));
        }
        Ok(Lookup::Miss) => {}
        Err(err) => return degrade(engine, "lookup", &err, request, next).await,
    }

    engine.stats.record_miss();

    match engine.lock.try_acquire(&key, engine.config.lock_ttl()).await {
        Ok(Some(lease)) => {
            debug!(cache = "response", outcome = "miss", "filling under lock");
            let response = fill(engine, &key, policy, request, next, CacheStatus::Miss).await;
            engine.lock.release(&lease).await;
            response
        }
        Ok(None) => {
            for attempt in 1..=engine.config.wait_attempts {
                tokio::time::sleep(engine.config.wait_interval()).await;
                match engine.responses.lookup(&key, policy.stale).await {
                    Ok(Lookup::Fresh { body, ttl }) => {
                        engine.stats.record_wait_hit();
                        debug!(cache = "response", outcome = "hit_after_wait", attempt);
                        return cached_response(body, CacheStatus::HitAfterWait, ttl);
                    }
                    Ok(Lookup::Stale { body, ttl }) => {
                        engine.stats.record_wait_hit();
                        debug!(cache = "response", outcome = "hit_after_wait", attempt);
                        return cached_response(body, CacheStatus::HitAfterWait, Some(ttl));
                    }
                    Ok(Lookup::Miss) => {}
                    Err(err) => return degrade(engine, "wait_lookup", &err, request, next).await,
                }
            }

            debug!(
                cache = "response",
                outcome = "miss",
                "refill still pending after wait, filling without lock"
            );
            fill(engine, &key, policy, request, next, CacheStatus::Miss).await
        }
        Err(err) => degrade(engine, "lock", &err, request, next).await,
    }
}

fn is_bypass(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(BYPASS_HEADER)
        .is_some_and(|value| value.as_bytes() == b"1")
}

async fn degrade(
    engine: &CacheEngine,
    op: &'static str,
    err: &StoreError,
    request: Request<Body>,
    next: Next,
) -> Response {
    engine.stats.record_store_error(op);
    warn!(cache = "response", op, error = %err, "cache store failed, serving uncached");
    next.run(request).await
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

async fn schedule_revalidation(engine: &CacheEngine, key: &str, path_and_query: String) {
    match engine
        .lock
        .try_acquire(key, engine.config.revalidate_lock_ttl())
        .await
    {
        Ok(Some(lease)) => {
            spawn_revalidation(
                Arc::clone(&engine.revalidator),
                engine.lock.clone(),
                lease,
                Arc::clone(&engine.stats),
                RevalidationRequest {
                    key: key.to_string(),
                    path_and_query,
                },
                engine.config.revalidate_timeout(),
            );
        }
        Ok(None) => debug!(cache = "response", key, "revalidation already in flight"),
        Err(err) => {
            engine.stats.record_store_error("revalidate_lock");
            warn!(cache = "response", key, error = %err, "could not lock for revalidation");
        }
    }
}

/// Run the handler and store its output when it is cacheable.
async fn fill(
    engine: &CacheEngine,
    key: &str,
    policy: CachePolicy,
    request: Request<Body>,
    next: Next,
    status: CacheStatus,
) -> Response {
    let response = next.run(request).await;
    if !should_store_response(&response, engine.config.body_limit_bytes) {
        return tag(response, status, None);
    }

    let (response, body) = match buffer_response(response).await {
        Ok(buffered) => buffered,
        Err(err) => {
            warn!(cache = "response", key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if serde_json::from_slice::<IgnoredAny>(&body).is_err() {
        debug!(cache = "response", key, "handler output is not JSON, not caching");
        return tag(response, status, None);
    }

    if let Err(err) = engine.responses.put(key, &body, policy.ttl).await {
        engine.stats.record_store_error("put");
        warn!(cache = "response", key, error = %err, "failed to store response");
        return tag(response, status, None);
    }

    tag(response, status, Some(policy.ttl))
}

fn should_store_response(response: &Response, body_limit: usize) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    // Streaming bodies have no upper bound and pass through untouched.
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= body_limit as u64)
}

async fn buffer_response(response: Response) -> Result<(Response, Bytes), axum::Error> {
    let (parts, body) = response.into_parts();
    let bytes = BodyExt::collect(body).await?.to_bytes();
    Ok((Response::from_parts(parts, Body::from(bytes.clone())), bytes))
}

fn cached_response(body: Bytes, status: CacheStatus, ttl: Option<Duration>) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    tag(response, status, ttl)
}

fn tag(mut response: Response, status: CacheStatus, ttl: Option<Duration>) -> Response {
    let headers = response.headers_mut();
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
    if let Some(ttl) = ttl {
        headers.insert(CACHE_TTL_HEADER, HeaderValue::from(ttl.as_secs()));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_header_values() {
        assert_eq!(CacheStatus::Hit.as_str(), "HIT");
        assert_eq!(CacheStatus::HitAfterWait.as_str(), "HIT-AFTER-WAIT");
        assert_eq!(CacheStatus::Bypass.as_str(), "BYPASS");
    }

    #[test]
    fn policy_never_has_zero_ttl() {
        let policy = CachePolicy::new(0, 0);
        assert_eq!(policy.ttl, Duration::from_secs(1));
        assert_eq!(policy.stale, Duration::ZERO);
    }

    #[test]
    fn bypass_requires_exact_marker() {
        let marked = Request::builder()
            .uri("/api/cars")
            .header(BYPASS_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let other = Request::builder()
            .uri("/api/cars")
            .header(BYPASS_HEADER, "yes")
            .body(Body::empty())
            .unwrap();
        assert!(is_bypass(&marked));
        assert!(!is_bypass(&other));
    }

    #[test]
    fn only_bounded_ok_bodies_are_stored() {
        let ok = Response::new(Body::from("{}"));
        assert!(should_store_response(&ok, 1024));
        assert!(!should_store_response(&Response::new(Body::from("x".repeat(64))), 16));

        let mut created = Response::new(Body::from("{}"));
        *created.status_mut() = StatusCode::CREATED;
        assert!(!should_store_response(&created, 1024));

        let mut cookie = Response::new(Body::from("{}"));
        cookie
            .headers_mut()
            .insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        assert!(!should_store_response(&cookie, 1024));
    }

    fn assert_send_layer<F, Fut>(_: F)
    where
        F: Fn(State<CacheState>, Request<Body>, Next) -> Fut,
        Fut: Future<Output = Response> + Send,
    {
    }

    #[test]
    fn layer_future_is_send() {
        assert_send_layer(response_cache_layer);
    }

    #[test]
    fn replay_target_keeps_the_query() {
        let uri: Uri = "/api/cars?brand=kia&page=2".parse().unwrap();
        assert_eq!(path_and_query(&uri), "/api/cars?brand=kia&page=2");
        let bare: Uri = "/api/brands".parse().unwrap();
        assert_eq!(path_and_query(&bare), "/api/brands");
    }

    #[test]
    fn cached_response_carries_headers() {
        let response = cached_response(
            Bytes::from_static(b"{}"),
            CacheStatus::Stale,
            Some(Duration::from_secs(42)),
        );
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "STALE");
        assert_eq!(response.headers()[CACHE_TTL_HEADER], "42");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}
