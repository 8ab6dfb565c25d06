use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    application::error::HttpError,
    cache::{CacheState, EntityCache, EntityFields, response_cache_layer},
    catalog::{Brand, CarModel, CatalogSource, ModelFilter},
    search::{SearchIndex, SearchOutcome},
    store::KvStore,
};

use super::{
    middleware::{log_responses, set_request_context},
    store_health_response,
};

const CAR_LIST_TTL_SECS: u64 = 300;
const CAR_LIST_STALE_SECS: u64 = 60;
const CAR_DETAIL_TTL_SECS: u64 = 600;
const CAR_DETAIL_STALE_SECS: u64 = 120;
const BRAND_LIST_TTL_SECS: u64 = 3600;
const BRAND_LIST_STALE_SECS: u64 = 600;
const ENTITY_TTL: Duration = Duration::from_secs(CAR_DETAIL_TTL_SECS);

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<dyn CatalogSource>,
    pub search: Arc<SearchIndex>,
    pub entities: Arc<EntityCache>,
    pub store: Arc<dyn KvStore>,
    pub cache: CacheState,
}

pub fn build_router(state: HttpState) -> Router {
    let car_list = Router::new()
        .route("/api/cars", get(list_cars))
        .layer(middleware::from_fn_with_state(
            state.cache.policy(CAR_LIST_TTL_SECS, CAR_LIST_STALE_SECS),
            response_cache_layer,
        ));

    let car_detail = Router::new()
        .route("/api/cars/{slug}", get(car_detail))
        .layer(middleware::from_fn_with_state(
            state
                .cache
                .policy(CAR_DETAIL_TTL_SECS, CAR_DETAIL_STALE_SECS),
            response_cache_layer,
        ));

    let brand_list = Router::new()
        .route("/api/brands", get(list_brands))
        .layer(middleware::from_fn_with_state(
            state.cache.policy(BRAND_LIST_TTL_SECS, BRAND_LIST_STALE_SECS),
            response_cache_layer,
        ));

    // Search answers from its own index and is never response-cached.
    let uncached = Router::new()
        .route("/api/search", get(search))
        .route("/_health/store", get(public_health));

    car_list
        .merge(car_detail)
        .merge(brand_list)
        .merge(uncached)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CarListResponse {
    models: Vec<CarModel>,
    page: usize,
    per_page: usize,
}

async fn list_cars(State(state): State<HttpState>, Query(filter): Query<ModelFilter>) -> Response {
    match state.catalog.list_models(&filter).await {
        Ok(models) => Json(CarListResponse {
            models,
            page: filter.page,
            per_page: filter.per_page,
        })
        .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn car_detail(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    let model = match state.catalog.find_model(&slug).await {
        Ok(Some(model)) => model,
        Ok(None) => {
            return HttpError::new(
                "infra::http::public::car_detail",
                StatusCode::NOT_FOUND,
                "Car not found",
                format!("no active model matches slug `{slug}`"),
            )
            .into_response();
        }
        Err(err) => return HttpError::from(err).into_response(),
    };

    match state.catalog.brands().await {
        Ok(brands) => {
            let fields = entity_fields(&model, &brands);
            let entities = Arc::clone(&state.entities);
            tokio::spawn(async move {
                entities.cache_entity(&fields.id, &fields, ENTITY_TTL).await;
            });
        }
        Err(err) => warn!(
            target = "motorway::http::public",
            error = %err,
            "skipping entity record, brands unavailable"
        ),
    }

    Json(model).into_response()
}

async fn list_brands(State(state): State<HttpState>) -> Response {
    match state.catalog.brands().await {
        Ok(mut brands) => {
            brands.sort_by(|a, b| a.name.cmp(&b.name));
            Json(brands).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn search(State(state): State<HttpState>, Query(query): Query<SearchQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(state.search.config().default_limit);

    match state.search.query(&query.q, limit).await {
        SearchOutcome::Hits(results) => Json(results).into_response(),
        SearchOutcome::Unavailable => match state.search.query_live(&query.q, limit).await {
            Ok(results) => Json(results).into_response(),
            Err(err) => HttpError::from_error(
                "infra::http::public::search",
                StatusCode::SERVICE_UNAVAILABLE,
                "Search unavailable",
                &err,
            )
            .into_response(),
        },
    }
}

async fn public_health(State(state): State<HttpState>) -> Response {
    store_health_response(state.store.ping().await)
}

pub(super) fn entity_fields(model: &CarModel, brands: &[Brand]) -> EntityFields {
    let brand = brands
        .iter()
        .find(|brand| brand.id == model.brand_id)
        .map(|brand| brand.name.clone())
        .unwrap_or_default();

    EntityFields {
        id: model.id.clone(),
        name: model.name.clone(),
        brand,
        price: model.price,
        fuel_type: model.fuel_type.clone(),
        transmission: model.transmission.clone(),
        rating: model.rating,
        image: model.hero_image.clone(),
        updated_at: model.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{brand, model};

    #[test]
    fn entity_fields_join_brand_name() {
        let mut creta = model("m-1", "Creta", "b-1");
        creta.price = Some(1_100_000.0);
        creta.hero_image = Some("creta.jpg".to_string());

        let fields = entity_fields(&creta, &[brand("b-1", "Hyundai")]);
        assert_eq!(fields.brand, "Hyundai");
        assert_eq!(fields.price, Some(1_100_000.0));
        assert_eq!(fields.image.as_deref(), Some("creta.jpg"));

        let orphan = entity_fields(&model("m-2", "Mystery", "b-404"), &[]);
        assert_eq!(orphan.brand, "");
    }
}
