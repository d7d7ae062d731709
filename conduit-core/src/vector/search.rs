//! Similarity search against a remote vector store.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::types::{SearchTarget, VectorMatch};
use crate::error::GatewayError;
use crate::provider::utils::read_failure;

/// Name reported as the provider when the similarity service fails.
pub const SEARCH_PROVIDER: &str = "supabase";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("similarity service returned HTTP {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    #[error("failed to reach similarity service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected similarity service response: {0}")]
    Decode(String),
}

impl From<SearchError> for GatewayError {
    fn from(err: SearchError) -> Self {
        let (message, upstream_status, upstream_body) = match err {
            SearchError::Upstream {
                status,
                message,
                body,
            } => (message, Some(status), body),
            SearchError::Transport(e) => (
                "failed to reach similarity service".to_string(),
                e.status().map(|s| s.as_u16()),
                None,
            ),
            SearchError::Decode(message) => (message, None, None),
        };
        GatewayError::Provider {
            provider: SEARCH_PROVIDER.to_string(),
            message,
            upstream_status,
            upstream_body,
        }
    }
}

/// Finds stored documents similar to an embedding.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Returns at most `limit` matches with similarity of at least `threshold`.
    async fn search(
        &self,
        target: &SearchTarget,
        embedding: &[f32],
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<VectorMatch>, SearchError>;
}

/// Calls a Postgres function through the Supabase REST interface.
#[derive(Debug, Clone)]
pub struct SupabaseSearch {
    rpc_function: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl SupabaseSearch {
    pub fn new(rpc_function: impl Into<String>, timeout: Duration, http_client: reqwest::Client) -> Self {
        Self {
            rpc_function: rpc_function.into(),
            timeout,
            http_client,
        }
    }

    fn endpoint(&self, target: &SearchTarget) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            target.base_url.trim_end_matches('/'),
            self.rpc_function
        )
    }
}

#[async_trait]
impl SimilaritySearch for SupabaseSearch {
    async fn search(
        &self,
        target: &SearchTarget,
        embedding: &[f32],
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<VectorMatch>, SearchError> {
        let body = serde_json::json!({
            "query_embedding": embedding,
            "match_threshold": threshold,
            "match_count": limit,
        });

        let response = self
            .http_client
            .post(self.endpoint(target))
            .timeout(self.timeout)
            .header("apikey", &target.api_key)
            .bearer_auth(&target.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = read_failure(response).await;
            tracing::warn!(status = failure.status, message = %failure.message, "similarity search rejected");
            return Err(SearchError::Upstream {
                status: failure.status,
                message: failure.message,
                body: failure.body,
            });
        }

        response
            .json::<Vec<VectorMatch>>()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))
    }
}
