//! Model ports — the abstraction over text generation and embedding backends.
//!
//! The memory core never talks to an inference server directly. It asks a
//! [`GenerationPort`] for summaries and an [`EmbeddingPort`] for vectors.
//!
//! Implementations: OpenAI-compatible HTTP endpoints (OpenAI, Ollama, vLLM,
//! Triton's OpenAI frontend), offline local stand-ins, test scripts.
//!
//! Retries are the adapter's business. The core calls each port once and
//! wraps the call in [`with_timeout`].

use crate::error::PortError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Produces text from a prompt and a system instruction.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Adapter name (e.g. "openai_compat", "extractive").
    fn name(&self) -> &str;

    /// Generate a completion. `timeout` is advisory for the adapter; the
    /// caller enforces it independently.
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        timeout: Duration,
    ) -> std::result::Result<String, PortError>;
}

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    fn name(&self) -> &str;

    /// The length of every vector this port returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, PortError>;
}

/// Run a port call under a deadline, mapping expiry to [`PortError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    fut: F,
) -> std::result::Result<T, PortError>
where
    F: Future<Output = std::result::Result<T, PortError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Embed `text` and check the result against the port's declared dimension.
pub async fn embed_checked(
    port: &dyn EmbeddingPort,
    text: &str,
    timeout: Duration,
) -> std::result::Result<Vec<f32>, PortError> {
    let vector = with_timeout("embed", timeout, port.embed(text)).await?;
    if vector.len() != port.dimension() {
        return Err(PortError::Dimension {
            expected: port.dimension(),
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingPort for SlowEmbedder {
        fn name(&self) -> &str {
            "slow"
        }
        fn dimension(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, PortError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0, 1.0])
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingPort for ShortEmbedder {
        fn name(&self) -> &str {
            "short"
        }
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, PortError> {
            Ok(vec![1.0])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_port_error() {
        let err = embed_checked(&SlowEmbedder, "x", Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            PortError::Timeout { operation, timeout_ms } => {
                assert_eq!(operation, "embed");
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let err = embed_checked(&ShortEmbedder, "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Dimension { expected: 4, actual: 1 }));
    }
}
