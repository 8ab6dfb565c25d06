use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crate::application::error::HttpError;

use super::AdminState;

/// Drop both index copies and rebuild from the catalog.
pub(super) async fn rebuild_index(State(state): State<AdminState>) -> Response {
    match state.search.invalidate().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::admin::rebuild_index",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Search rebuild failed",
            &err,
        )
        .into_response(),
    }
}

pub(super) async fn index_meta(State(state): State<AdminState>) -> Response {
    match state.search.meta().await {
        Some(meta) => Json(meta).into_response(),
        None => HttpError::new(
            "infra::http::admin::index_meta",
            StatusCode::NOT_FOUND,
            "Index not built",
            "no search index generation found",
        )
        .into_response(),
    }
}
