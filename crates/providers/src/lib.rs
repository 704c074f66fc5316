//! Generation and embedding adapters for memtier.
//!
//! Every adapter implements `memtier_core::GenerationPort` and/or
//! `memtier_core::EmbeddingPort`. The router builds the configured pair.

pub mod local;
pub mod openai_compat;
pub mod router;

pub use local::{ExtractiveGenerator, HashingEmbedder};
pub use openai_compat::OpenAiCompatClient;
pub use router::{ModelPorts, build_from_config};
