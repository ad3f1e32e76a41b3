//! Viewer identity resolved from the session endpoint.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use devlog_api_types::{SessionResponse, SessionUser};

use crate::application::repos::{IdentityProvider, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::Viewer;

use super::client::ApiClient;

const SOURCE: &str = "infra::http::session";

/// Fetches the session once and answers from memory afterwards.
///
/// A transport failure is not remembered, so the next call asks again.
#[derive(Debug)]
pub struct SessionIdentity {
    client: Arc<ApiClient>,
    cached: RwLock<Option<Option<Viewer>>>,
}

impl SessionIdentity {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cached: RwLock::new(None),
        }
    }

    /// Ask the server again, replacing whatever was cached.
    pub async fn refresh(&self) -> Result<Option<Viewer>, RepoError> {
        let viewer = match self
            .client
            .get::<SessionResponse>("api/auth/session", &[])
            .await
        {
            Ok(session) => session.user.map(into_viewer),
            Err(RepoError::Unauthenticated) => None,
            Err(err) => return Err(err),
        };
        *rw_write(&self.cached, SOURCE, "refresh") = Some(viewer.clone());
        debug!(signed_in = viewer.is_some(), "Session resolved");
        Ok(viewer)
    }

    /// Forget the cached session, e.g. after signing out.
    pub fn forget(&self) {
        *rw_write(&self.cached, SOURCE, "forget") = None;
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_viewer(&self) -> Option<Viewer> {
        let cached = rw_read(&self.cached, SOURCE, "current_viewer").clone();
        if let Some(viewer) = cached {
            return viewer;
        }
        match self.refresh().await {
            Ok(viewer) => viewer,
            Err(err) => {
                warn!(error = %err, "Failed to resolve session; treating as signed out");
                None
            }
        }
    }
}

fn into_viewer(user: SessionUser) -> Viewer {
    Viewer {
        id: user.id,
        name: user.name,
        image: user.image,
    }
}
