//! Static descriptions of the providers and the models they offer.

pub mod catalog;

pub use catalog::{default_catalog, ChatModel, EmbeddingModel, Model, ProviderCatalog, ProviderInfo};
