use crate::error::EmbeddingError;
use crate::generation::service_root;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Maps text to fixed-length vectors. Batches either succeed whole or fail.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeds through the `/api/embed` batch endpoint of an Ollama server.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: Client::new(),
            endpoint: service_root(base_url)?.join("api/embed")?,
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                details,
            });
        }

        let payload: EmbedResponse = response.json().await?;
        debug!(model = %self.model, batch = texts.len(), "embedded batch");
        validate_batch(payload.embeddings, texts.len(), self.dimensions)
    }
}

fn validate_batch(
    vectors: Vec<Vec<f32>>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }

    if let Some(wrong) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbeddingError::Dimension {
            expected: dimensions,
            actual: wrong.len(),
        });
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Hydraulic pressure and flow");
        let second = embedder.embed_one("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.dimensions(), 32);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["first text".to_string(), "second text".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed_one("second text"));
    }

    #[test]
    fn short_batches_are_rejected_whole() {
        let result = validate_batch(vec![vec![0.0; 4]], 2, 4);
        assert!(matches!(
            result,
            Err(EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));

        let result = validate_batch(vec![vec![0.0; 4], vec![0.0; 3]], 2, 4);
        assert!(matches!(result, Err(EmbeddingError::Dimension { .. })));
    }

    #[test]
    fn ollama_endpoint_is_joined_to_base_url() {
        let embedder = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text", 768)
            .unwrap();
        assert_eq!(embedder.endpoint.as_str(), "http://localhost:11434/api/embed");

        let proxied = OllamaEmbedder::new("http://gateway.local/ollama", "nomic-embed-text", 768)
            .unwrap();
        assert_eq!(proxied.endpoint.as_str(), "http://gateway.local/ollama/api/embed");
    }
}
