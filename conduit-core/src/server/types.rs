//! Wire types for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::auth::{Principal, Session};
use crate::dispatch::DispatchOutcome;
use crate::models::ProviderInfo;
use crate::provider::{ChatCompletion, ProviderId, StreamChunk, Usage};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: Principal,
    pub token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            user: session.principal,
            token: session.token.token,
            expires_in: session.token.expires_in_secs,
            expires_at: session.token.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMetadata {
    pub provider: ProviderId,
    pub elapsed_ms: u64,
}

/// Keys the gateway always sets itself on a completion body.
const OWNED_KEYS: [&str; 8] = [
    "id", "object", "created", "model", "provider", "choices", "usage", "metadata",
];

/// Non-streaming chat response in the `chat.completion` shape.
///
/// For OpenAI-compatible upstreams `choices` is the upstream array verbatim
/// and any other upstream fields ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionBody {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub provider: ProviderId,
    pub choices: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub metadata: CompletionMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<DispatchOutcome> for ChatCompletionBody {
    fn from(outcome: DispatchOutcome) -> Self {
        let ChatCompletion {
            id,
            provider,
            model,
            created,
            content,
            finish_reason,
            usage,
            native,
        } = outcome.completion;

        let mut extra = native.unwrap_or_default();
        let choices = match extra.remove("choices") {
            Some(Value::Array(choices)) if !choices.is_empty() => choices,
            _ => vec![json!({
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason,
            })],
        };
        for key in OWNED_KEYS {
            extra.remove(key);
        }

        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            provider,
            choices,
            usage,
            metadata: CompletionMetadata {
                provider,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            },
            extra,
        }
    }
}

/// Identity shared by every frame of one streamed response.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDelta {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One `data:` frame of a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkFrame {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub provider: ProviderId,
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunkFrame {
    pub fn new(meta: &StreamMeta, chunk: StreamChunk) -> Self {
        Self {
            id: meta.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: meta.created,
            model: meta.model.clone(),
            provider: meta.provider,
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: chunk.content,
                },
                finish_reason: chunk.finish_reason,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    #[serde(flatten)]
    pub info: ProviderInfo,
    /// Registered in this process
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub providers: Vec<ProviderId>,
    pub rate_limit_backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}
