//! conduit-core - Gateway in front of heterogeneous LLM providers
//!
//! Accepts chat, embedding, and vector-search requests, authenticates and
//! rate-limits them, dispatches them to one upstream provider behind a single
//! normalized contract, and relays results (token streams included) back to
//! the caller under one error taxonomy.
//!
//! ## Primary API
//!
//! Most users build a [`Server`] from a [`GatewayConfig`] and run it. The
//! router is available on its own through [`server::create_router`] for
//! embedding and testing.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod provider;
pub mod ratelimit;
pub mod server;
pub mod vector;

pub use auth::{AuthError, CredentialService, Principal, Role, Session};
pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{Dispatcher, Phase, RequestLifecycle};
pub use error::{ErrorEnvelope, ErrorKind, GatewayError};
pub use models::ProviderCatalog;
pub use ratelimit::{RateLimiter, RouteClass};
pub use server::{create_router, AppState, Server, ServerError};
pub use vector::VectorSearch;

// Provider exports
pub use provider::{
    ChatCompletion, ChatRequest, EmbeddingRequest, EmbeddingResponse, Message, MessageRole,
    Provider, ProviderError, ProviderId, ProviderRegistry, StreamChunk,
};
