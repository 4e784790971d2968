//! Memory system implementations for loopwright.
//!
//! - [`stm`]: pure ring-buffer operations over the session's short-term memory
//! - [`InMemoryLtmStore`]: content-keyed long-term fact store with similarity search
//! - [`HashEmbedder`]: deterministic offline embeddings

pub mod embedding;
pub mod in_memory;
pub mod noop;
pub mod stm;
pub mod vector;

pub use embedding::HashEmbedder;
pub use in_memory::{InMemoryLtmStore, LtmLimits, content_key};
pub use noop::NoopLtmStore;
pub use vector::{cosine_similarity, vector_search};
