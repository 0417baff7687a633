use crate::{
    config::AppConfig,
    services::{catalog_service::Catalog, chunk_store::ChunkStore},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ChunkStore,
    pub catalog: Catalog,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: ChunkStore, catalog: Catalog, config: AppConfig) -> Self {
        Self {
            store,
            catalog,
            config: Arc::new(config),
        }
    }
}
