use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::application::error::HttpError;

use super::AdminState;

pub(super) async fn car_entity(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Response {
    match state.entities.get_entity(&id).await {
        Some(fields) => Json(fields).into_response(),
        None => HttpError::new(
            "infra::http::admin::car_entity",
            StatusCode::NOT_FOUND,
            "Entity not cached",
            format!("no entity record for car `{id}`"),
        )
        .into_response(),
    }
}
