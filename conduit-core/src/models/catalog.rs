use serde::{Deserialize, Serialize};

use crate::config::ProvidersConfig;
use crate::provider::ProviderId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatModel {
    pub id: String,
    pub name: String,
    pub context_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingModel {
    pub id: String,
    pub name: String,
    pub context_length: usize,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Model {
    Chat(ChatModel),
    Embedding(EmbeddingModel),
}

impl Model {
    pub fn id(&self) -> &str {
        match self {
            Model::Chat(m) => &m.id,
            Model::Embedding(m) => &m.id,
        }
    }

    pub fn is_embedding(&self) -> bool {
        matches!(self, Model::Embedding(_))
    }
}

/// What a caller needs to know to use a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub supports_streaming: bool,
    pub supports_embeddings: bool,
    pub models: Vec<Model>,
}

impl ProviderInfo {
    pub fn chat_models(&self) -> impl Iterator<Item = &ChatModel> {
        self.models.iter().filter_map(|m| match m {
            Model::Chat(chat) => Some(chat),
            _ => None,
        })
    }

    pub fn embedding_models(&self) -> impl Iterator<Item = &EmbeddingModel> {
        self.models.iter().filter_map(|m| match m {
            Model::Embedding(embed) => Some(embed),
            _ => None,
        })
    }
}

/// Read-only catalog of every known provider, registered or not.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: Vec<ProviderInfo>,
}

impl ProviderCatalog {
    /// Catalog with base URLs taken from configuration.
    pub fn new(config: &ProvidersConfig) -> Self {
        let mut providers = default_catalog();
        for info in &mut providers {
            info.base_url = info.id.settings(config).base_url.clone();
        }
        Self { providers }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderInfo> {
        self.providers.iter().find(|p| p.id.as_str() == id)
    }

    pub fn all(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.to_string()).collect()
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new(&ProvidersConfig::default())
    }
}

fn chat(id: &str, name: &str, context_length: usize) -> Model {
    Model::Chat(ChatModel {
        id: id.to_string(),
        name: name.to_string(),
        context_length,
    })
}

fn embedding(id: &str, name: &str, context_length: usize, embedding_dim: usize) -> Model {
    Model::Embedding(EmbeddingModel {
        id: id.to_string(),
        name: name.to_string(),
        context_length,
        embedding_dim,
    })
}

pub fn default_catalog() -> Vec<ProviderInfo> {
    let defaults = ProvidersConfig::default();
    let info = |id: ProviderId, name: &str, description: &str, models: Vec<Model>| ProviderInfo {
        id,
        name: name.to_string(),
        description: description.to_string(),
        base_url: id.settings(&defaults).base_url.clone(),
        supports_streaming: true,
        supports_embeddings: models.iter().any(Model::is_embedding),
        models,
    };

    vec![
        info(
            ProviderId::Xai,
            "xAI",
            "Grok models over the OpenAI-compatible API",
            vec![
                chat("grok-4", "Grok 4", 256_000),
                chat("grok-3-mini", "Grok 3 Mini", 131_072),
            ],
        ),
        info(
            ProviderId::Anthropic,
            "Anthropic",
            "Claude models over the Messages API",
            vec![
                chat("claude-sonnet-4-5", "Claude Sonnet 4.5", 200_000),
                chat("claude-haiku-4-5", "Claude Haiku 4.5", 200_000),
            ],
        ),
        info(
            ProviderId::Deepseek,
            "DeepSeek",
            "DeepSeek chat and reasoning models",
            vec![
                chat("deepseek-chat", "DeepSeek Chat", 128_000),
                chat("deepseek-reasoner", "DeepSeek Reasoner", 128_000),
            ],
        ),
        info(
            ProviderId::Openrouter,
            "OpenRouter",
            "Routing to many hosted models",
            vec![
                chat("openai/gpt-4o", "GPT-4o", 128_000),
                chat("meta-llama/llama-3.3-70b-instruct", "Llama 3.3 70B Instruct", 131_072),
                embedding("openai/text-embedding-3-small", "Text Embedding 3 Small", 8_191, 1536),
            ],
        ),
        info(
            ProviderId::Nvidia,
            "NVIDIA",
            "NVIDIA NIM hosted models",
            vec![
                chat("meta/llama-3.1-70b-instruct", "Llama 3.1 70B Instruct", 128_000),
                embedding("nvidia/nv-embedqa-e5-v5", "NV-EmbedQA E5 v5", 512, 1024),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_provider() {
        let catalog = ProviderCatalog::default();
        for id in ProviderId::ALL {
            assert!(catalog.get(id.as_str()).is_some(), "{id} missing");
        }
        assert!(catalog.get("openai").is_none());
    }

    #[test]
    fn test_embedding_flags_match_models() {
        let catalog = ProviderCatalog::default();
        let nvidia = catalog.get("nvidia").unwrap();
        assert!(nvidia.supports_embeddings);
        assert_eq!(nvidia.embedding_models().next().unwrap().embedding_dim, 1024);

        assert!(!catalog.get("anthropic").unwrap().supports_embeddings);
    }

    #[test]
    fn test_base_url_follows_config() {
        let mut config = ProvidersConfig::default();
        config.xai.base_url = "http://localhost:4000/v1".into();

        let catalog = ProviderCatalog::new(&config);
        assert_eq!(catalog.get("xai").unwrap().base_url, "http://localhost:4000/v1");
    }

    #[test]
    fn test_model_ids_unique() {
        for provider in default_catalog() {
            let mut ids: Vec<_> = provider.models.iter().map(|m| m.id()).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), total, "duplicate model ids for {}", provider.id);
        }
    }
}
