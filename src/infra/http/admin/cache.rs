use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::error::HttpError,
    cache::{CacheHealth, StatsSnapshot},
    store::{StoreBackend, StoreStats},
};

use super::AdminState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStatsResponse {
    backend: StoreBackend,
    key_version: String,
    stats: StatsSnapshot,
    store: Option<StoreStats>,
}

pub(super) async fn cache_stats(State(state): State<AdminState>) -> Response {
    let responses = state.cache.responses();
    let store = match responses.store_stats().await {
        Ok(stats) => Some(stats),
        Err(err) => {
            warn!(
                target = "motorway::http::admin::cache",
                error = %err,
                "store statistics unavailable"
            );
            None
        }
    };

    Json(CacheStatsResponse {
        backend: responses.backend(),
        key_version: responses.keys().version().to_string(),
        stats: state.cache.stats().snapshot(),
        store,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClearResponse {
    cleared: bool,
    search_rebuilt: bool,
}

/// Flush the whole store. The search index lives in the same store, so it
/// is rewritten straight away from the catalog.
pub(super) async fn clear_cache(State(state): State<AdminState>) -> Response {
    if let Err(err) = state.cache.responses().clear_all().await {
        return HttpError::from_error(
            "infra::http::admin::clear_cache",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache store unavailable",
            &err,
        )
        .into_response();
    }
    info!(target = "motorway::http::admin::cache", "cache store flushed");

    let search_rebuilt = match state.search.invalidate().await {
        Ok(_) => true,
        Err(err) => {
            warn!(
                target = "motorway::http::admin::cache",
                error = %err,
                "search rebuild after flush failed"
            );
            false
        }
    };

    Json(ClearResponse {
        cleared: true,
        search_rebuilt,
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct InvalidateQuery {
    pattern: String,
}

#[derive(Debug, Serialize)]
struct InvalidateResponse {
    pattern: String,
    removed: u64,
}

pub(super) async fn invalidate_cache(
    State(state): State<AdminState>,
    Query(query): Query<InvalidateQuery>,
) -> Response {
    let pattern = query.pattern.trim();
    if pattern.is_empty() {
        return HttpError::new(
            "infra::http::admin::invalidate_cache",
            StatusCode::BAD_REQUEST,
            "Missing pattern",
            "query parameter `pattern` is required",
        )
        .into_response();
    }

    match state.cache.responses().invalidate(pattern).await {
        Ok(removed) => {
            info!(
                target = "motorway::http::admin::cache",
                pattern,
                removed,
                "cache entries invalidated"
            );
            Json(InvalidateResponse {
                pattern: pattern.to_string(),
                removed,
            })
            .into_response()
        }
        Err(err) => HttpError::from_error(
            "infra::http::admin::invalidate_cache",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache store unavailable",
            &err,
        )
        .into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: CacheHealth,
    backend: StoreBackend,
    hit_rate: f64,
    lookups: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(super) async fn cache_health(State(state): State<AdminState>) -> Response {
    let config = state.cache.config();
    let snapshot = state.cache.stats().snapshot();
    let responses = state.cache.responses();

    let (status, error) = match responses.ping().await {
        Ok(()) => (
            snapshot.health(config.health_min_hit_rate, config.health_min_samples),
            None,
        ),
        Err(err) => (CacheHealth::Unhealthy, Some(err.to_string())),
    };

    let code = match status {
        CacheHealth::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        CacheHealth::Healthy | CacheHealth::Degraded => StatusCode::OK,
    };

    (
        code,
        Json(HealthResponse {
            status,
            backend: responses.backend(),
            hit_rate: snapshot.hit_rate,
            lookups: snapshot.lookups(),
            error,
        }),
    )
        .into_response()
}
