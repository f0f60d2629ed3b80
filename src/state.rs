// src/state.rs
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError, StoreBackend};
use crate::db::{create_pool, run_migrations, PgStore};
use crate::media::{LocalMediaStorage, MediaStorage};
use crate::memory::MemoryStore;
use crate::store::{AuthService, GuestStore, PollStore, StoreError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to the database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AppState {
    pub polls: Arc<dyn PollStore>,
    pub guests: Arc<dyn GuestStore>,
    pub auth: Arc<dyn AuthService>,
    pub media: Arc<dyn MediaStorage>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, StartupError> {
        let media: Arc<dyn MediaStorage> = Arc::new(LocalMediaStorage::new(
            &config.media_dir,
            &config.public_base_url,
        ));

        match config.store {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let pool = create_pool(url, config.max_connections).await?;
                run_migrations(&pool).await?;
                info!("Connected to Postgres");
                let store = Arc::new(PgStore::new(pool));
                Ok(Self {
                    polls: store.clone(),
                    guests: store.clone(),
                    auth: store,
                    media,
                })
            }
            StoreBackend::Memory => {
                info!("Using in-memory store, data is lost on restart");
                Ok(Self::in_memory(Arc::new(MemoryStore::new()), media))
            }
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>, media: Arc<dyn MediaStorage>) -> Self {
        Self {
            polls: store.clone(),
            guests: store.clone(),
            auth: store,
            media,
        }
    }
}
