//! Catalog data source.
//!
//! The catalog is the origin behind the cached routes and the input of the
//! search index build. Only bulk read projections are needed here; writes
//! happen elsewhere and are followed by a search index invalidation.

mod file;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub use file::JsonFileCatalog;
pub use memory::InMemoryCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog document is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarModel {
    pub id: String,
    pub name: String,
    pub brand_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub hero_image: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

fn default_active() -> bool {
    true
}

/// The whole catalog as kept on disk or in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub brands: Vec<Brand>,
    #[serde(default)]
    pub models: Vec<CarModel>,
}

impl CatalogDocument {
    pub fn active_models(&self) -> Vec<CarModel> {
        self.models.iter().filter(|model| model.active).cloned().collect()
    }

    /// Active models matching `filter`, ordered by name and paginated.
    pub fn list_models(&self, filter: &ModelFilter) -> Vec<CarModel> {
        let brand_id = filter.brand.as_deref().and_then(|wanted| {
            self.brands
                .iter()
                .find(|brand| brand_slug(brand) == wanted || brand.id == wanted)
                .map(|brand| brand.id.as_str())
        });
        if filter.brand.is_some() && brand_id.is_none() {
            return Vec::new();
        }

        let mut models: Vec<&CarModel> = self
            .models
            .iter()
            .filter(|model| model.active)
            .filter(|model| brand_id.is_none_or(|id| model.brand_id == id))
            .filter(|model| {
                filter.fuel_type.as_deref().is_none_or(|fuel| {
                    model
                        .fuel_type
                        .as_deref()
                        .is_some_and(|value| value.eq_ignore_ascii_case(fuel))
                })
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));

        let per_page = filter.per_page.max(1);
        let skip = filter.page.saturating_sub(1).saturating_mul(per_page);
        models.into_iter().skip(skip).take(per_page).cloned().collect()
    }

    /// Active model addressed by its own slug or its `brand-model` slug.
    pub fn find_model(&self, slug: &str) -> Option<CarModel> {
        self.models
            .iter()
            .filter(|model| model.active)
            .find(|model| {
                let model_slug = model_slug(model);
                if model_slug == slug {
                    return true;
                }
                self.brands
                    .iter()
                    .find(|brand| brand.id == model.brand_id)
                    .is_some_and(|brand| format!("{}-{model_slug}", brand_slug(brand)) == slug)
            })
            .cloned()
    }
}

pub fn brand_slug(brand: &Brand) -> String {
    brand
        .slug
        .clone()
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| slug::slugify(&brand.name))
}

pub fn model_slug(model: &CarModel) -> String {
    model
        .slug
        .clone()
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| slug::slugify(&model.name))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelFilter {
    pub brand: Option<String>,
    #[serde(rename = "fuel")]
    pub fuel_type: Option<String>,
    pub page: usize,
    pub per_page: usize,
}

impl Default for ModelFilter {
    fn default() -> Self {
        Self {
            brand: None,
            fuel_type: None,
            page: 1,
            per_page: 20,
        }
    }
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every model currently listed for sale.
    async fn active_models(&self) -> Result<Vec<CarModel>, CatalogError>;

    async fn brands(&self) -> Result<Vec<Brand>, CatalogError>;

    async fn list_models(&self, filter: &ModelFilter) -> Result<Vec<CarModel>, CatalogError>;

    async fn find_model(&self, slug: &str) -> Result<Option<CarModel>, CatalogError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn brand(id: &str, name: &str) -> Brand {
        Brand {
            id: id.to_string(),
            name: name.to_string(),
            slug: None,
        }
    }

    pub fn model(id: &str, name: &str, brand_id: &str) -> CarModel {
        CarModel {
            id: id.to_string(),
            name: name.to_string(),
            brand_id: brand_id.to_string(),
            slug: None,
            hero_image: None,
            active: true,
            price: None,
            fuel_type: None,
            transmission: None,
            rating: None,
            updated_at: None,
        }
    }

    pub fn document() -> CatalogDocument {
        let mut venue = model("m-3", "Venue", "b-1");
        venue.fuel_type = Some("Diesel".to_string());
        let mut retired = model("m-9", "Santro", "b-1");
        retired.active = false;

        CatalogDocument {
            brands: vec![brand("b-1", "Hyundai"), brand("b-2", "Maruti Suzuki")],
            models: vec![
                model("m-1", "Creta", "b-1"),
                model("m-2", "Swift", "b-2"),
                venue,
                retired,
            ],
        }
    }
}
