//! conduit - Authenticated, rate-limited gateway for LLM providers
//!
//! Convenience crate re-exporting `conduit-core`.
//!
//! ```toml
//! [dependencies]
//! conduit = "0.1"
//! ```

pub use conduit_core::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use conduit_core::{
        ChatRequest, GatewayConfig, GatewayError, Message, Provider, ProviderId, ProviderRegistry,
        Server,
    };
}
