use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processed,
}

/// Metadata of an ingested document. The extracted text itself is not kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(rename = "size")]
    pub size_bytes: usize,
    pub checksum: String,
    #[serde(rename = "upload_time")]
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A stored chunk returned by nearest-neighbor search, most similar first.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub similarity_score: f32,
}

impl From<ChunkMatch> for SourceRef {
    fn from(value: ChunkMatch) -> Self {
        Self {
            document_id: value.chunk.document_id,
            chunk_index: value.chunk.chunk_index,
            text: value.chunk.text,
            similarity_score: value.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRecord {
    /// Seconds since the unix epoch.
    pub timestamp: f64,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub total_chunks: usize,
    pub collection_name: String,
    pub total_documents: usize,
}

/// Binary payload handed to the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 10;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RagOptions {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub max_top_k: usize,
    pub max_upload_bytes: usize,
    pub gateway_timeout: Duration,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            max_top_k: MAX_TOP_K,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

impl RagOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;

        if self.top_k == 0 || self.max_top_k == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.gateway_timeout.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "gateway_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Requested result count, falling back to the default and capped at `max_top_k`.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        let wanted = match requested {
            Some(count) if count > 0 => count,
            _ => self.top_k,
        };
        wanted.min(self.max_top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_falls_back_to_default_and_is_capped() {
        let options = RagOptions::default();
        assert_eq!(options.resolve_top_k(None), DEFAULT_TOP_K);
        assert_eq!(options.resolve_top_k(Some(0)), DEFAULT_TOP_K);
        assert_eq!(options.resolve_top_k(Some(3)), 3);
        assert_eq!(options.resolve_top_k(Some(50)), MAX_TOP_K);
    }

    #[test]
    fn invalid_chunking_is_rejected_at_validation() {
        let options = RagOptions {
            chunking: ChunkingConfig {
                chunk_size: 100,
                overlap: 100,
            },
            ..RagOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn document_serializes_with_api_field_names() -> Result<(), Box<dyn std::error::Error>> {
        let document = Document {
            id: "doc-1".to_string(),
            filename: "manual.pdf".to_string(),
            size_bytes: 42,
            checksum: "abc".to_string(),
            uploaded_at: Utc::now(),
            chunk_count: 3,
            status: DocumentStatus::Processed,
        };

        let value = serde_json::to_value(&document)?;
        assert_eq!(value["size"], 42);
        assert_eq!(value["status"], "processed");
        assert!(value.get("upload_time").is_some());
        Ok(())
    }
}
