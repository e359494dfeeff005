use crate::error::GatewayError;
use async_trait::async_trait;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Inputs carried by one `embed_batch` round trip. Callers split larger
    /// inputs and bound each call on its own.
    fn batch_size(&self) -> usize {
        1
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Rejects gateway output that does not hold one vector of the advertised
/// dimension per input.
pub fn check_embeddings(
    gateway: &dyn EmbeddingGateway,
    expected_count: usize,
    vectors: &[Vec<f32>],
) -> Result<(), GatewayError> {
    if vectors.len() != expected_count {
        return Err(GatewayError::malformed(
            gateway.name(),
            format!(
                "returned {} embeddings for {} inputs",
                vectors.len(),
                expected_count
            ),
        ));
    }

    if let Some(vector) = vectors
        .iter()
        .find(|vector| vector.len() != gateway.dimensions())
    {
        return Err(GatewayError::DimensionMismatch {
            expected: gateway.dimensions(),
            actual: vector.len(),
        });
    }

    if vectors.iter().flatten().any(|value| !value.is_finite()) {
        return Err(GatewayError::malformed(
            gateway.name(),
            "embedding contains non-finite values",
        ));
    }

    Ok(())
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

/// Local hashing embedder over character trigrams. Needs no network and is
/// deterministic, which makes it the default for offline use.
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
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
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
impl EmbeddingGateway for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn batch_size(&self) -> usize {
        256
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        Ok(self.embed_text(text))
    }
}
