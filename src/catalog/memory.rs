use std::sync::RwLock;

use async_trait::async_trait;

use crate::util::sync::{read_lock, write_lock};

use super::{Brand, CarModel, CatalogDocument, CatalogError, CatalogSource, ModelFilter};

const SOURCE: &str = "catalog::memory";

/// Catalog held in process memory. Used by tests and by callers that mutate
/// the catalog and then invalidate the search index.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    document: RwLock<CatalogDocument>,
}

impl InMemoryCatalog {
    pub fn new(document: CatalogDocument) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }

    pub fn replace(&self, document: CatalogDocument) {
        *write_lock(&self.document, SOURCE, "replace") = document;
    }

    /// Insert `model`, replacing any model with the same id.
    pub fn upsert_model(&self, model: CarModel) {
        let mut document = write_lock(&self.document, SOURCE, "upsert_model");
        match document.models.iter_mut().find(|existing| existing.id == model.id) {
            Some(existing) => *existing = model,
            None => document.models.push(model),
        }
    }

    pub fn remove_model(&self, id: &str) -> bool {
        let mut document = write_lock(&self.document, SOURCE, "remove_model");
        let before = document.models.len();
        document.models.retain(|model| model.id != id);
        document.models.len() != before
    }

    pub fn snapshot(&self) -> CatalogDocument {
        read_lock(&self.document, SOURCE, "snapshot").clone()
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn active_models(&self) -> Result<Vec<CarModel>, CatalogError> {
        Ok(read_lock(&self.document, SOURCE, "active_models").active_models())
    }

    async fn brands(&self) -> Result<Vec<Brand>, CatalogError> {
        Ok(read_lock(&self.document, SOURCE, "brands").brands.clone())
    }

    async fn list_models(&self, filter: &ModelFilter) -> Result<Vec<CarModel>, CatalogError> {
        Ok(read_lock(&self.document, SOURCE, "list_models").list_models(filter))
    }

    async fn find_model(&self, slug: &str) -> Result<Option<CarModel>, CatalogError> {
        Ok(read_lock(&self.document, SOURCE, "find_model").find_model(slug))
    }
}
