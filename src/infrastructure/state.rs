use std::sync::Arc;

use tracing::info;

use crate::infrastructure::{
    config::Config,
    db,
    extraction::{build_extraction_service, ExtractionService},
    records::{build_record_store, RecordStore},
    storage::{build_storage, StorageBackend},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub records: Arc<dyn RecordStore>,
    pub storage: Arc<dyn StorageBackend>,
    pub extraction: Arc<dyn ExtractionService>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn StorageBackend>,
        extraction: Arc<dyn ExtractionService>,
    ) -> Self {
        Self {
            config,
            records,
            storage,
            extraction,
        }
    }

    /// Builds every collaborator named in `config`, connecting to and
    /// migrating PostgreSQL when it backs the record store.
    pub async fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let pool = if config.records.provider == "postgres" {
            let pool = db::connect(&config.database).await?;
            db::run_migrations(&pool).await?;
            info!("database migrations completed successfully");
            Some(pool)
        } else {
            None
        };

        let records = build_record_store(&config.records, pool)?;
        let storage = build_storage(&config.storage)?;
        let extraction = build_extraction_service(&config.extraction)?;
        Ok(Self::new(config, records, storage, extraction))
    }
}
