//! Vector search: embed a query, then ask a similarity service for matches.

mod embedder;
mod search;
mod types;

pub use embedder::Embedder;
pub use search::{SearchError, SimilaritySearch, SupabaseSearch, SEARCH_PROVIDER};
pub use types::{
    SearchMetadata, SearchParams, SearchTarget, VectorMatch, VectorSearchRequest,
    VectorSearchResponse,
};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::VectorSearchConfig;
use crate::error::{GatewayError, Result};
use crate::provider::ProviderRegistry;

pub struct VectorSearch {
    registry: Arc<ProviderRegistry>,
    search: Arc<dyn SimilaritySearch>,
    config: VectorSearchConfig,
}

impl VectorSearch {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        search: Arc<dyn SimilaritySearch>,
        config: VectorSearchConfig,
    ) -> Self {
        Self {
            registry,
            search,
            config,
        }
    }

    /// Orchestrator backed by [`SupabaseSearch`].
    pub fn supabase(registry: Arc<ProviderRegistry>, config: VectorSearchConfig) -> std::result::Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let search = SupabaseSearch::new(
            config.rpc_function.clone(),
            Duration::from_secs(config.timeout_secs),
            http_client,
        );
        Ok(Self::new(registry, Arc::new(search), config))
    }

    pub fn config(&self) -> &VectorSearchConfig {
        &self.config
    }

    fn embedder(&self, model: &str) -> Result<Embedder> {
        // The embedding provider comes from configuration, so a miss is ours, not the caller's.
        let provider = self
            .registry
            .get(&self.config.embedding_provider)
            .map_err(|_| {
                GatewayError::internal(format!(
                    "embedding provider '{}' is not registered",
                    self.config.embedding_provider
                ))
            })?;
        Ok(Embedder::new(provider, model))
    }

    /// Validates, embeds, then searches.
    ///
    /// Validation happens before any outbound call. The threshold and limit
    /// are passed to the similarity service unchanged and its matches are
    /// returned as received.
    pub async fn search(&self, request: VectorSearchRequest) -> Result<VectorSearchResponse> {
        let params = request.validate(&self.config)?;
        let embedder = self.embedder(&params.embedding_model)?;

        let started = Instant::now();
        let embedding = embedder.embed(&params.query).await?;
        let embedding_time = started.elapsed().as_millis() as u64;
        debug!(dimensions = embedding.len(), embedding_time, "query embedded");

        let started = Instant::now();
        let results = self
            .search
            .search(&params.target, &embedding, params.threshold, params.limit)
            .await?;
        let search_time = started.elapsed().as_millis() as u64;

        info!(
            results = results.len(),
            embedding_time,
            search_time,
            "vector search complete"
        );

        Ok(VectorSearchResponse {
            success: true,
            metadata: SearchMetadata {
                embedding_time,
                search_time,
                total_time: embedding_time + search_time,
                result_count: results.len(),
                threshold: params.threshold,
                limit: params.limit,
                embedding_model: embedder.model().to_string(),
                embedding_provider: embedder.provider_id().to_string(),
            },
            query: params.query,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FixedEmbedder {
        fn id(&self) -> ProviderId {
            ProviderId::Nvidia
        }

        async fn chat(&self, _request: &ChatRequest) -> crate::provider::Result<ChatCompletion> {
            unreachable!("chat is not used by vector search")
        }

        async fn stream_chat(&self, _request: &ChatRequest) -> crate::provider::Result<ChunkStream> {
            unreachable!("streaming is not used by vector search")
        }

        fn supports_embeddings(&self) -> bool {
            true
        }

        async fn embeddings(&self, request: &EmbeddingRequest) -> crate::provider::Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingResponse {
                data: vec![Embedding {
                    embedding: vec![0.1, 0.2, 0.3],
                    index: 0,
                }],
                model: request.model.clone(),
                usage: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingSearch {
        seen: Mutex<Vec<(f64, u32)>>,
    }

    #[async_trait]
    impl SimilaritySearch for RecordingSearch {
        async fn search(
            &self,
            _target: &SearchTarget,
            embedding: &[f32],
            threshold: f64,
            limit: u32,
        ) -> std::result::Result<Vec<VectorMatch>, SearchError> {
            assert_eq!(embedding, &[0.1, 0.2, 0.3]);
            self.seen.lock().unwrap().push((threshold, limit));
            // Below the threshold on purpose: the orchestrator must not filter.
            Ok(vec![VectorMatch {
                id: serde_json::json!(1),
                content: "low score".into(),
                similarity: 0.1,
                metadata: serde_json::json!({}),
                created_at: None,
            }])
        }
    }

    fn fixture() -> (VectorSearch, Arc<FixedEmbedder>, Arc<RecordingSearch>) {
        let provider = Arc::new(FixedEmbedder {
            calls: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::builder().register(provider.clone()).build();
        let search = Arc::new(RecordingSearch::default());
        let orchestrator = VectorSearch::new(Arc::new(registry), search.clone(), VectorSearchConfig::default());
        (orchestrator, provider, search)
    }

    fn request() -> VectorSearchRequest {
        VectorSearchRequest {
            query: Some("borrow checker".into()),
            threshold: Some(0.42),
            limit: Some(5),
            supabase_url: Some("https://abc.supabase.co".into()),
            supabase_key: Some("key".into()),
            embedding_model: None,
        }
    }

    #[tokio::test]
    async fn test_threshold_passes_through_unfiltered() {
        let (orchestrator, _, search) = fixture();
        let response = orchestrator.search(request()).await.unwrap();

        assert_eq!(*search.seen.lock().unwrap(), vec![(0.42, 5)]);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.metadata.result_count, 1);
        assert_eq!(response.metadata.threshold, 0.42);
        assert_eq!(response.metadata.embedding_provider, "nvidia");
        assert_eq!(
            response.metadata.total_time,
            response.metadata.embedding_time + response.metadata.search_time
        );
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let (orchestrator, provider, search) = fixture();
        let bad = VectorSearchRequest {
            query: Some("x".repeat(8001)),
            ..request()
        };

        let err = orchestrator.search(bad).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(search.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_embedding_provider_is_internal() {
        let registry = ProviderRegistry::builder().build();
        let orchestrator = VectorSearch::new(
            Arc::new(registry),
            Arc::new(RecordingSearch::default()),
            VectorSearchConfig::default(),
        );
        let err = orchestrator.search(request()).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 500);
    }
}
