//! Route handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::state::AppState;
use super::transport::JsonBody;
use super::types::*;
use crate::auth::Principal;
use crate::dispatch::RequestLifecycle;
use crate::error::GatewayError;
use crate::provider::{ChatRequest, ChunkStream, EmbeddingRequest, ProviderId, DONE_MARKER};
use crate::vector::VectorSearchRequest;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

type HandlerResult<T> = Result<T, GatewayError>;

pub async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> HandlerResult<(StatusCode, Json<SessionResponse>)> {
    let session = state
        .credentials
        .register(&body.email, &body.password, body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> HandlerResult<Json<SessionResponse>> {
    let session = state.credentials.login(&body.email, &body.password).await?;
    Ok(Json(session.into()))
}

pub async fn me(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> HandlerResult<Response> {
    if request.stream {
        let chunks = state.dispatcher.stream_chat(&request, &lifecycle).await?;
        let meta = StreamMeta {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            model: request.model.clone(),
            // Resolved by the dispatcher, so the name is a known id.
            provider: request
                .provider
                .parse::<ProviderId>()
                .map_err(GatewayError::internal)?,
            created: chrono::Utc::now().timestamp(),
        };
        return Ok(relay(chunks, meta, lifecycle).into_response());
    }

    let outcome = state.dispatcher.chat(&request, &lifecycle).await?;
    Ok(Json(ChatCompletionBody::from(outcome)).into_response())
}

/// Ends the lifecycle if the client goes away before the stream finishes.
struct DisconnectGuard(RequestLifecycle);

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.0.fail() {
            debug!(trace_id = %self.0.trace_id(), "client disconnected mid-stream");
        }
    }
}

/// Relays upstream fragments as SSE frames, in upstream order.
///
/// A clean upstream end is followed by `data: [DONE]`. An upstream failure
/// after the first byte becomes a single `event: error` frame carrying the
/// envelope, and the stream closes without `[DONE]`.
fn relay(
    chunks: ChunkStream,
    meta: StreamMeta,
    lifecycle: RequestLifecycle,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = DisconnectGuard(lifecycle);
    let frames = async_stream::stream! {
        let guard = guard;
        let mut chunks = chunks;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    let frame = ChatChunkFrame::new(&meta, chunk);
                    match Event::default().json_data(&frame) {
                        Ok(event) => yield Ok::<_, Infallible>(event),
                        Err(e) => {
                            warn!(trace_id = %guard.0.trace_id(), error = %e, "failed to encode stream frame");
                            guard.0.fail();
                            yield Ok(error_event(&GatewayError::internal(e), guard.0.trace_id()));
                            return;
                        }
                    }
                }
                Err(e) => {
                    let err = GatewayError::from(e);
                    warn!(trace_id = %guard.0.trace_id(), error = %err, "stream failed after commit");
                    guard.0.fail();
                    yield Ok(error_event(&err, guard.0.trace_id()));
                    return;
                }
            }
        }

        guard.0.complete();
        yield Ok(Event::default().data(DONE_MARKER));
    };

    Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn error_event(err: &GatewayError, trace_id: &str) -> Event {
    let payload = serde_json::to_string(&err.envelope(trace_id))
        .unwrap_or_else(|_| json!({ "type": "InternalError" }).to_string());
    Event::default().event("error").data(payload)
}

pub async fn embeddings(
    State(state): State<AppState>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    JsonBody(request): JsonBody<EmbeddingRequest>,
) -> HandlerResult<Response> {
    let response = state.dispatcher.embeddings(&request, &lifecycle).await?;
    Ok(Json(response).into_response())
}

pub async fn vector_search(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<VectorSearchRequest>,
) -> HandlerResult<Response> {
    let response = state.vector.search(request).await?;
    Ok(Json(response).into_response())
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    let registry = state.dispatcher.registry();
    let summaries = state
        .catalog
        .all()
        .iter()
        .map(|info| ProviderSummary {
            available: registry.contains(info.id),
            info: info.clone(),
        })
        .collect();
    Json(summaries)
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<ProviderSummary>> {
    let info = state.catalog.get(&id).ok_or_else(|| GatewayError::NotFound {
        message: format!("Provider '{id}' not found"),
        details: Some(json!({ "availableProviders": state.catalog.ids() })),
    })?;
    Ok(Json(ProviderSummary {
        available: state.dispatcher.registry().contains(info.id),
        info: info.clone(),
    }))
}

pub async fn admin_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    let providers: Vec<_> = ProviderId::ALL
        .into_iter()
        .map(|id| {
            let settings = id.settings(&config.providers);
            json!({
                "id": id,
                "enabled": settings.enabled,
                "registered": state.dispatcher.registry().contains(id),
                "baseUrl": settings.base_url,
                "hasApiKey": settings.resolve_api_key().is_some(),
            })
        })
        .collect();

    Json(json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port,
            "corsOrigins": config.server.cors_origins,
            "trustForwardedFor": config.server.trust_forwarded_for,
        },
        "auth": {
            "issuer": config.auth.issuer,
            "tokenTtlSecs": config.auth.token_ttl_secs,
            "adminEmails": config.auth.admin_emails.len(),
        },
        "rateLimit": {
            "backend": state.limiter.backend(),
            "auth": config.rate_limit.auth,
            "chat": config.rate_limit.chat,
            "default": config.rate_limit.default,
            "vectorSearch": config.rate_limit.vector_search,
        },
        "providers": providers,
        "vectorSearch": config.vector_search,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        providers: state.dispatcher.registry().ids(),
        rate_limit_backend: state.limiter.backend().as_str().to_string(),
    })
}

pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    if state.dispatcher.registry().is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse {
                status: "no providers registered".to_string(),
            }),
        );
    }
    (
        StatusCode::OK,
        Json(StatusResponse {
            status: "ready".to_string(),
        }),
    )
}

pub async fn not_found() -> GatewayError {
    GatewayError::not_found("Route not found")
}
