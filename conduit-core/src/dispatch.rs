//! Request dispatch: validation, provider resolution, and the per-request
//! lifecycle state machine.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{GatewayError, Result};
use crate::provider::{
    ChatCompletion, ChatRequest, ChunkStream, EmbeddingRequest, EmbeddingResponse, Provider,
    ProviderRegistry,
};

/// Where a request is in its lifecycle.
///
/// Phases only move forward. Public routes skip `Authenticated`; every
/// request ends in exactly one of `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Received,
    Authenticated,
    RateChecked,
    Validated,
    Dispatched,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Phase::Failed => true,
            Phase::Completed => self == Phase::Dispatched || self < Phase::Validated,
            _ => next > self,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct LifecycleState {
    phase: Phase,
    streaming: bool,
}

/// Shared handle to one request's phase.
///
/// Cloned into request extensions so middleware, handlers and the stream
/// relay all advance the same state.
#[derive(Clone)]
pub struct RequestLifecycle {
    trace_id: Arc<str>,
    state: Arc<Mutex<LifecycleState>>,
}

impl RequestLifecycle {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Arc::from(trace_id.into()),
            state: Arc::new(Mutex::new(LifecycleState {
                phase: Phase::Received,
                streaming: false,
            })),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LifecycleState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn phase(&self) -> Phase {
        self.with_state(|s| s.phase)
    }

    pub fn is_streaming(&self) -> bool {
        self.with_state(|s| s.streaming)
    }

    /// Moves to `next`, or fails with an internal error if the move is illegal.
    pub fn advance(&self, next: Phase) -> Result<()> {
        let trace_id = self.trace_id.clone();
        self.with_state(|state| {
            let current = state.phase;
            if !current.can_advance_to(next) {
                return Err(GatewayError::internal(format!(
                    "illegal lifecycle transition {current} -> {next}"
                )));
            }
            state.phase = next;
            debug!(trace_id = %trace_id, from = %current, to = %next, "lifecycle transition");
            Ok(())
        })
    }

    /// Marks the request failed unless it already ended. Returns whether it moved.
    pub fn fail(&self) -> bool {
        self.advance(Phase::Failed).is_ok()
    }

    /// Marks the request completed unless it already ended. Returns whether it moved.
    pub fn complete(&self) -> bool {
        self.advance(Phase::Completed).is_ok()
    }

    /// The response body outlives the handler; completion is reported by the stream.
    pub fn mark_streaming(&self) {
        self.with_state(|s| s.streaming = true);
    }
}

impl fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("trace_id", &self.trace_id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// A completion plus the time spent waiting for it.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub completion: ChatCompletion,
    pub elapsed: Duration,
}

/// Routes validated requests to the adapter named in the request.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn prepare(&self, request: &ChatRequest, lifecycle: &RequestLifecycle) -> Result<Arc<dyn Provider>> {
        request.validate()?;
        let provider = self.registry.get(&request.provider)?;
        lifecycle.advance(Phase::Validated)?;
        Ok(provider)
    }

    /// Non-streaming chat.
    pub async fn chat(&self, request: &ChatRequest, lifecycle: &RequestLifecycle) -> Result<DispatchOutcome> {
        let result = self.try_chat(request, lifecycle).await;
        if result.is_err() {
            lifecycle.fail();
        }
        result
    }

    async fn try_chat(&self, request: &ChatRequest, lifecycle: &RequestLifecycle) -> Result<DispatchOutcome> {
        let provider = self.prepare(request, lifecycle)?;
        lifecycle.advance(Phase::Dispatched)?;

        let started = Instant::now();
        let completion = provider.chat(request).await?;
        let elapsed = started.elapsed();

        info!(
            trace_id = %lifecycle.trace_id(),
            provider = %provider.id(),
            model = %request.model,
            elapsed_ms = elapsed.as_millis() as u64,
            "chat completed"
        );
        lifecycle.advance(Phase::Completed)?;
        Ok(DispatchOutcome { completion, elapsed })
    }

    /// Opens a stream. The caller owns completing or failing the lifecycle
    /// once the stream ends.
    pub async fn stream_chat(&self, request: &ChatRequest, lifecycle: &RequestLifecycle) -> Result<ChunkStream> {
        let result = self.try_stream_chat(request, lifecycle).await;
        if result.is_err() {
            lifecycle.fail();
        }
        result
    }

    async fn try_stream_chat(&self, request: &ChatRequest, lifecycle: &RequestLifecycle) -> Result<ChunkStream> {
        let provider = self.prepare(request, lifecycle)?;
        lifecycle.advance(Phase::Dispatched)?;
        let stream = provider.stream_chat(request).await?;
        lifecycle.mark_streaming();
        debug!(trace_id = %lifecycle.trace_id(), provider = %provider.id(), "stream opened");
        Ok(stream)
    }

    pub async fn embeddings(
        &self,
        request: &EmbeddingRequest,
        lifecycle: &RequestLifecycle,
    ) -> Result<EmbeddingResponse> {
        let result = self.try_embeddings(request, lifecycle).await;
        if result.is_err() {
            lifecycle.fail();
        }
        result
    }

    async fn try_embeddings(
        &self,
        request: &EmbeddingRequest,
        lifecycle: &RequestLifecycle,
    ) -> Result<EmbeddingResponse> {
        request.validate()?;
        let provider = self.registry.get(&request.provider)?;
        lifecycle.advance(Phase::Validated)?;
        lifecycle.advance(Phase::Dispatched)?;
        let response = provider.embeddings(request).await?;
        lifecycle.advance(Phase::Completed)?;
        Ok(response)
    }
}
