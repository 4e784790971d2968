//! Model gateway and LLM provider implementations for loopwright.
//!
//! All backends implement `loopwright_core::Provider`. The [`ModelGateway`]
//! binds them to the `fast`/`smart`/`cheap` tiers and accounts for usage.

pub mod embedding;
pub mod fallback;
pub mod gateway;
pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod usage;

pub use embedding::ProviderEmbedder;
pub use fallback::{BackendChain, SERVED_BY_KEY, served_by};
pub use gateway::{
    Criticality, Invocation, ModelGateway, ModelHandle, ModelTier, Structured, extract_json,
    parse_structured,
};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryProvider;
pub use router::{ProviderRouter, build_embedder, build_from_config, build_gateway};
pub use usage::{estimate_tokens, estimate_usage, normalize_usage, resolve_usage};
