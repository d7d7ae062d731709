use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthError, CredentialService, UserStore};
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::models::ProviderCatalog;
use crate::provider::ProviderRegistry;
use crate::ratelimit::RateLimiter;
use crate::vector::VectorSearch;

/// Everything a handler can reach. Cheap to clone; all of it is read-only
/// apart from the counter and user stores behind their own locks.
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Dispatcher,
    pub vector: Arc<VectorSearch>,
    pub catalog: Arc<ProviderCatalog>,
    pub config: Arc<GatewayConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<ProviderRegistry>,
        limiter: RateLimiter,
        users: Arc<dyn UserStore>,
        vector: VectorSearch,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            credentials: CredentialService::new(&config.auth, users)?,
            limiter: Arc::new(limiter),
            dispatcher: Dispatcher::new(registry),
            vector: Arc::new(vector),
            catalog: Arc::new(ProviderCatalog::new(&config.providers)),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }
}
