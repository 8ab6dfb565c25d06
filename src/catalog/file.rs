use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{Brand, CarModel, CatalogDocument, CatalogError, CatalogSource, ModelFilter};

/// Catalog read from a JSON document on every call, so edits to the file
/// show up on the next request or index build without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CatalogDocument, CatalogError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.path.clone(),
                source,
            })?;
        let document: CatalogDocument = serde_json::from_slice(&raw)?;
        debug!(
            path = %self.path.display(),
            brands = document.brands.len(),
            models = document.models.len(),
            "catalog loaded"
        );
        Ok(document)
    }
}

#[async_trait]
impl CatalogSource for JsonFileCatalog {
    async fn active_models(&self) -> Result<Vec<CarModel>, CatalogError> {
        Ok(self.load().await?.active_models())
    }

    async fn brands(&self) -> Result<Vec<Brand>, CatalogError> {
        Ok(self.load().await?.brands)
    }

    async fn list_models(&self, filter: &ModelFilter) -> Result<Vec<CarModel>, CatalogError> {
        Ok(self.load().await?.list_models(filter))
    }

    async fn find_model(&self, slug: &str) -> Result<Option<CarModel>, CatalogError> {
        Ok(self.load().await?.find_model(slug))
    }
}
