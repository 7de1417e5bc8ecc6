//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::storage::{ImageStore, StorageError};
use crate::upload::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: ImageStore,
    registry: SessionRegistry,
}

impl AppState {
    /// Create the application state, initializing the image store directory
    /// and the session registry.
    pub async fn new(config: Config) -> Result<Self, StorageError> {
        let store = ImageStore::new(&config.storage).await?;
        let registry = SessionRegistry::new(config.limits.chunk_timeout);
        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                registry,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the image store
    pub fn store(&self) -> &ImageStore {
        &self.inner.store
    }

    /// Get the upload session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }
}
