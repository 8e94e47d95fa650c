//! Shared application state for the admin surface.

use std::sync::Arc;

use async_trait::async_trait;
use portico_authz::{AuthorityService, AuthzResult, PolicyEngine, RoleSource, RoleTablePolicy};
use portico_cache::HybridCache;

/// State handed to every admin handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<HybridCache>,
    pub authority: Arc<AuthorityService>,
}

impl AppState {
    /// Wire the state from a cache and the deployment's injected
    /// collaborators.
    pub fn new(
        cache: Arc<HybridCache>,
        roles: Arc<dyn RoleSource>,
        engine: Arc<dyn PolicyEngine>,
    ) -> Self {
        let authority = Arc::new(AuthorityService::new(Arc::clone(&cache), roles, engine));
        Self { cache, authority }
    }

    /// State for a standalone admin process with the default role table and
    /// no role store. The admin surface only invalidates and inspects; it
    /// never evaluates decisions, and with this role source any evaluation
    /// would deny.
    pub fn admin_only(cache: Arc<HybridCache>) -> Self {
        Self::new(cache, Arc::new(NoRoleSource), Arc::new(RoleTablePolicy))
    }
}

/// Role source for deployments that do not wire a user store: resolves every
/// user to no roles.
pub struct NoRoleSource;

#[async_trait]
impl RoleSource for NoRoleSource {
    async fn roles_for(&self, _user_id: &str) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }
}
