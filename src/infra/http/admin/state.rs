use std::sync::Arc;

use crate::{
    cache::{CacheEngine, EntityCache},
    search::SearchIndex,
};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<CacheEngine>,
    pub search: Arc<SearchIndex>,
    pub entities: Arc<EntityCache>,
}
