use std::{sync::Arc, time::Duration};

use sqlx::PgPool;

use crate::{
    config::Config,
    error::AppResult,
    repository::{memory::MemoryStore, Repositories},
    services::{
        encryption::PiiCipher,
        storage::{BlobStore, MemoryBlobStore, UrlSigner},
    },
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repos: Repositories,
    pub cipher: Arc<PiiCipher>,
    pub blobs: Arc<dyn BlobStore>,
    pub signer: UrlSigner,
    /// Present when backed by Postgres; used by the health check.
    pub db: Option<PgPool>,
    /// Login throttling is disabled when Redis is not configured.
    pub redis: Option<redis::aio::MultiplexedConnection>,
}

impl AppState {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.config.storage_timeout_secs)
    }

    /// State over in-memory repositories and blob store, for tests and local runs.
    pub fn in_memory(config: Config, store: Arc<MemoryStore>, blobs: Arc<MemoryBlobStore>) -> AppResult<Self> {
        let signer = UrlSigner::new(&config.storage_signing_key, &config.public_base_url)?;
        Ok(Self {
            cipher: Arc::new(PiiCipher::from_config(&config)?),
            config: Arc::new(config),
            repos: Repositories::from_memory(store),
            blobs,
            signer,
            db: None,
            redis: None,
        })
    }
}
