//! Query embedding through a provider adapter.

use crate::provider::{Provider, ProviderError, ProviderId};
use std::sync::Arc;

/// Converts text into a vector embedding using one provider and model.
///
/// The vector is passed to the similarity service as is, so the model must
/// match the one used when the stored documents were embedded.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Generates a vector embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the provider does not offer embeddings
    /// - the provider API is unreachable or rejects the request
    /// - the API returns no embeddings
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.provider.embed(text, &self.model).await
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.id()
    }
}
