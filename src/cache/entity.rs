//! Field-structured entity records.
//!
//! Cars are stored as hashes at `entity:car:{id}` so callers can read a few
//! fields without fetching and parsing a whole response body. These records
//! never take part in response caching or its locks.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::warn;

use crate::store::{KvStore, WriteBatch};

pub const ENTITY_PREFIX: &str = "entity:car";

const FIELD_ID: &str = "id";
const FIELD_NAME: &str = "name";
const FIELD_BRAND: &str = "brand";
const FIELD_PRICE: &str = "price";
const FIELD_FUEL_TYPE: &str = "fuelType";
const FIELD_TRANSMISSION: &str = "transmission";
const FIELD_RATING: &str = "rating";
const FIELD_IMAGE: &str = "image";
const FIELD_UPDATED_AT: &str = "updatedAt";

pub fn entity_key(id: &str) -> String {
    format!("{ENTITY_PREFIX}:{id}")
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFields {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: Option<f64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub rating: Option<f64>,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl EntityFields {
    /// Every field is written, absent ones as empty strings, so a rewrite
    /// never leaves fields from an older record behind.
    fn to_pairs(&self) -> Vec<(String, String)> {
        let optional = [
            (FIELD_PRICE, self.price.map(|price| price.to_string())),
            (FIELD_FUEL_TYPE, self.fuel_type.clone()),
            (FIELD_TRANSMISSION, self.transmission.clone()),
            (FIELD_RATING, self.rating.map(|rating| rating.to_string())),
            (FIELD_IMAGE, self.image.clone()),
            (
                FIELD_UPDATED_AT,
                self.updated_at.and_then(|at| at.format(&Rfc3339).ok()),
            ),
        ];

        [
            (FIELD_ID, self.id.clone()),
            (FIELD_NAME, self.name.clone()),
            (FIELD_BRAND, self.brand.clone()),
        ]
        .into_iter()
        .chain(
            optional
                .into_iter()
                .map(|(field, value)| (field, value.unwrap_or_default())),
        )
        .map(|(field, value)| (field.to_string(), value))
        .collect()
    }

    fn from_hash(mut hash: HashMap<String, String>) -> Self {
        let mut take = |field: &str| hash.remove(field).filter(|value| !value.is_empty());
        Self {
            id: take(FIELD_ID).unwrap_or_default(),
            name: take(FIELD_NAME).unwrap_or_default(),
            brand: take(FIELD_BRAND).unwrap_or_default(),
            price: take(FIELD_PRICE).and_then(|value| value.parse().ok()),
            fuel_type: take(FIELD_FUEL_TYPE),
            transmission: take(FIELD_TRANSMISSION),
            rating: take(FIELD_RATING).and_then(|value| value.parse().ok()),
            image: take(FIELD_IMAGE),
            updated_at: take(FIELD_UPDATED_AT)
                .and_then(|value| OffsetDateTime::parse(&value, &Rfc3339).ok()),
        }
    }
}

#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn KvStore>,
}

impl EntityCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Overwrite the record for `id` and set its lifetime.
    pub async fn cache_entity(&self, id: &str, fields: &EntityFields, ttl: Duration) {
        let key = entity_key(id);
        let mut batch = WriteBatch::new();
        batch.hset(key.as_str(), fields.to_pairs()).expire(key.as_str(), ttl);

        if let Err(err) = self.store.execute_batch(batch).await {
            warn!(cache = "entity", key = %key, error = %err, "failed to cache entity");
        }
    }

    /// `None` when the record is absent or the store cannot be read.
    pub async fn get_entity(&self, id: &str) -> Option<EntityFields> {
        let key = entity_key(id);
        match self.store.hgetall(&key).await {
            Ok(hash) if hash.is_empty() => None,
            Ok(hash) => Some(EntityFields::from_hash(hash)),
            Err(err) => {
                warn!(cache = "entity", key = %key, error = %err, "failed to read entity");
                None
            }
        }
    }
}
