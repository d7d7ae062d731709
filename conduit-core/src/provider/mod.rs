//! LLM provider abstraction layer.
//!
//! Every upstream backend is wrapped in an adapter implementing [`Provider`],
//! which translates between the canonical request/response types and the
//! provider's wire format. The [`ProviderRegistry`] maps ids to adapters.

mod types;
pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod utils;

// Re-export common types
pub use types::{
    ChatCompletion,
    ChatRequest,
    ChunkStream,
    Embedding,
    EmbeddingInput,
    EmbeddingRequest,
    EmbeddingResponse,
    EmbeddingUsage,
    Message,
    MessageRole,
    Provider,
    ProviderError,
    ProviderId,
    Result,
    StreamChunk,
    UnknownProviderId,
    Usage,
    DONE_MARKER,
};

pub(crate) use types::field_problem;

// Re-export provider implementations
pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
