use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::VectorSearchConfig;
use crate::error::{self, GatewayError};
use crate::provider::field_problem;

/// A vector search request as sent by clients.
///
/// Everything is optional on the wire so that missing fields are reported
/// together with invalid ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchRequest {
    pub query: Option<String>,
    pub threshold: Option<f64>,
    pub limit: Option<u32>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub embedding_model: Option<String>,
}

/// The similarity service to query, supplied per request.
#[derive(Clone)]
pub struct SearchTarget {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchTarget")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A request that passed validation, with defaults filled in.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub threshold: f64,
    pub limit: u32,
    pub embedding_model: String,
    pub target: SearchTarget,
}

impl VectorSearchRequest {
    /// Checks every field without touching the network.
    pub fn validate(self, config: &VectorSearchConfig) -> error::Result<SearchParams> {
        let mut problems = Vec::new();

        let query = self.query.unwrap_or_default();
        let query_chars = query.chars().count();
        if query.trim().is_empty() {
            problems.push(field_problem("query", "must not be empty"));
        } else if query_chars > config.max_query_chars {
            problems.push(field_problem(
                "query",
                &format!("must be at most {} characters", config.max_query_chars),
            ));
        }

        let threshold = self.threshold.unwrap_or(config.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            problems.push(field_problem("threshold", "must be between 0 and 1"));
        }

        let limit = self.limit.unwrap_or(config.default_limit);
        if limit == 0 || limit > config.max_limit {
            problems.push(field_problem(
                "limit",
                &format!("must be between 1 and {}", config.max_limit),
            ));
        }

        let base_url = self.supabase_url.unwrap_or_default();
        match url::Url::parse(&base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
            _ => problems.push(field_problem("supabaseUrl", "must be an absolute http(s) URL")),
        }

        let api_key = self.supabase_key.unwrap_or_default();
        if api_key.trim().is_empty() {
            problems.push(field_problem("supabaseKey", "must not be empty"));
        }

        let embedding_model = match self.embedding_model {
            Some(model) if model.trim().is_empty() => {
                problems.push(field_problem("embeddingModel", "must not be empty"));
                model
            }
            Some(model) => model,
            None => config.embedding_model.clone(),
        };

        if !problems.is_empty() {
            return Err(GatewayError::validation_with(
                "Invalid vector search request",
                serde_json::json!({ "fields": problems }),
            ));
        }

        Ok(SearchParams {
            query,
            threshold,
            limit,
            embedding_model,
            target: SearchTarget { base_url, api_key },
        })
    }
}

/// One document returned by the similarity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMatch {
    pub id: Value,
    #[serde(default)]
    pub content: String,
    pub similarity: f64,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    /// Milliseconds spent embedding the query
    pub embedding_time: u64,
    /// Milliseconds spent in the similarity service
    pub search_time: u64,
    /// Always `embedding_time + search_time`
    pub total_time: u64,
    pub result_count: usize,
    pub threshold: f64,
    pub limit: u32,
    pub embedding_model: String,
    pub embedding_provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSearchResponse {
    pub success: bool,
    pub query: String,
    pub results: Vec<VectorMatch>,
    pub metadata: SearchMetadata,
}
