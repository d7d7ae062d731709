use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::anthropic::AnthropicProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::types::{Provider, ProviderId};
use crate::config::ProvidersConfig;
use crate::error::GatewayError;

/// Connection timeout shared by all provider clients. Request timeouts are per provider.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable mapping from provider id to adapter.
///
/// Built once at startup and shared read-only by every request.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Registers an adapter for every enabled provider section.
    ///
    /// A provider without an API key is still registered so that the catalog
    /// reports it; its upstream will reject requests with an auth error.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let mut builder = Self::builder();
        for id in ProviderId::ALL {
            let settings = id.settings(config);
            if !settings.enabled {
                info!(provider = %id, "provider disabled");
                continue;
            }
            if settings.resolve_api_key().is_none() {
                warn!(provider = %id, env = %settings.api_key_env, "no API key configured");
            }

            let provider: Arc<dyn Provider> = match id {
                ProviderId::Anthropic => Arc::new(AnthropicProvider::new(settings, http_client.clone())),
                other => Arc::new(OpenAiCompatProvider::new(other, settings, http_client.clone())),
            };
            builder = builder.register(provider);
        }

        let registry = builder.build();
        info!(providers = ?registry.ids(), "provider registry ready");
        Ok(registry)
    }

    /// Exact-match lookup. A miss lists every registered id.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, GatewayError> {
        name.parse::<ProviderId>()
            .ok()
            .and_then(|id| self.providers.get(&id))
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider {
                provider: name.to_string(),
                available: self.ids().iter().map(|id| id.to_string()).collect(),
            })
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }

    /// Registered ids in a stable order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    pub fn all(&self) -> Vec<&Arc<dyn Provider>> {
        self.providers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRegistryBuilder {
    /// Adds an adapter, replacing any earlier one with the same id.
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}
