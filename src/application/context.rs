//! Shared handles every action service works through.

use std::sync::Arc;

use crate::application::error::ActionError;
use crate::application::repos::IdentityProvider;
use crate::cache::{CacheConfig, EntityCacheStore, MutationCoordinator, QueryClient};
use crate::domain::entities::Viewer;

/// One session's cache, coordinator and identity.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<EntityCacheStore>,
    pub coordinator: Arc<MutationCoordinator>,
    pub queries: QueryClient,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: CacheConfig,
}

impl SyncContext {
    pub fn new(config: &CacheConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let store = Arc::new(EntityCacheStore::new(config));
        Self {
            coordinator: Arc::new(MutationCoordinator::new(store.clone())),
            queries: QueryClient::new(store.clone()),
            store,
            identity,
            config: config.clone(),
        }
    }

    pub async fn viewer(&self) -> Option<Viewer> {
        self.identity.current_viewer().await
    }

    pub async fn viewer_id(&self) -> Option<uuid::Uuid> {
        self.viewer().await.map(|viewer| viewer.id)
    }

    /// Actions that change state need a signed-in viewer.
    pub async fn require_viewer(&self) -> Result<Viewer, ActionError> {
        self.viewer().await.ok_or(ActionError::NotAuthenticated)
    }
}
