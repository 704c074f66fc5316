//! Provider selection — builds the configured generation / embedding pair.

use crate::local::{ExtractiveGenerator, HashingEmbedder};
use crate::openai_compat::OpenAiCompatClient;
use memtier_config::{AppConfig, ProviderKind};
use memtier_core::error::PortError;
use memtier_core::provider::{EmbeddingPort, GenerationPort};
use std::sync::Arc;
use tracing::info;

/// The two model ports the memory manager consumes.
#[derive(Clone)]
pub struct ModelPorts {
    pub generator: Arc<dyn GenerationPort>,
    pub embedder: Arc<dyn EmbeddingPort>,
}

impl ModelPorts {
    /// Offline ports: hashing embedder + extractive summaries.
    pub fn local(dimension: usize) -> Self {
        Self {
            generator: Arc::new(ExtractiveGenerator::default()),
            embedder: Arc::new(HashingEmbedder::new(dimension)),
        }
    }
}

/// Build model ports from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<ModelPorts, PortError> {
    let dimension = config.memory.embedding_dimension;
    let ports = match config.provider.kind {
        ProviderKind::Local => ModelPorts::local(dimension),
        ProviderKind::OpenaiCompat => {
            let client = Arc::new(
                OpenAiCompatClient::new(
                    "openai_compat",
                    &config.provider.base_url,
                    config.provider.api_key.clone().unwrap_or_default(),
                    dimension,
                )?
                .with_models(
                    &config.provider.generation_model,
                    &config.provider.embedding_model,
                ),
            );
            ModelPorts {
                generator: client.clone(),
                embedder: client,
            }
        }
    };
    info!(
        generator = ports.generator.name(),
        embedder = ports.embedder.name(),
        dimension,
        "Model ports ready"
    );
    Ok(ports)
}
