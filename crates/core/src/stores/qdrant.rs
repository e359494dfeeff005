use crate::models::{Chunk, ChunkMatch, EmbeddedChunk};
use crate::traits::VectorStoreGateway;
use crate::GatewayError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), GatewayError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), GatewayError> {
        if vector.len() != self.vector_size {
            return Err(GatewayError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStoreGateway for QdrantStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, batch: &[EmbeddedChunk]) -> Result<(), GatewayError> {
        let points = batch
            .iter()
            .map(|entry| {
                self.check_dimension(&entry.embedding)?;
                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": entry.embedding,
                    "payload": {
                        "document_id": entry.chunk.document_id,
                        "chunk_index": entry.chunk.chunk_index,
                        "text": entry.chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkMatch>, GatewayError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(vector)?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parse_search_hits(&parsed)
    }

    async fn count(&self) -> Result<usize, GatewayError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| GatewayError::malformed(BACKEND, "count response without result.count"))
    }

    async fn remove_document(&self, document_id: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "document_id", "match": { "value": document_id } }
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn reset(&self) -> Result<(), GatewayError> {
        let response = self.client.delete(self.collection_url()).send().await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        self.ensure_collection().await
    }
}

fn backend_error(status: StatusCode) -> GatewayError {
    GatewayError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

fn parse_search_hits(parsed: &Value) -> Result<Vec<ChunkMatch>, GatewayError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::malformed(BACKEND, "search response without result array"))?;

    hits.iter()
        .map(|hit| {
            let document_id = hit
                .pointer("/payload/document_id")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::malformed(BACKEND, "hit without document_id"))?;
            let chunk_index = hit
                .pointer("/payload/chunk_index")
                .and_then(Value::as_u64)
                .ok_or_else(|| GatewayError::malformed(BACKEND, "hit without chunk_index"))?;
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            Ok(ChunkMatch {
                chunk: Chunk {
                    document_id: document_id.to_string(),
                    chunk_index: chunk_index as usize,
                    text: text.to_string(),
                },
                score: score as f32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_keep_backend_ranking() {
        let body = json!({
            "result": [
                {"id": "a", "score": 0.91, "payload": {"document_id": "doc-1", "chunk_index": 4, "text": "pump"}},
                {"id": "b", "score": 0.42, "payload": {"document_id": "doc-2", "chunk_index": 0, "text": "valve"}}
            ]
        });

        let hits = parse_search_hits(&body).expect("hits parse");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document_id, "doc-1");
        assert_eq!(hits[0].chunk.chunk_index, 4);
        assert_eq!(hits[1].chunk.text, "valve");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn hits_without_provenance_are_malformed() {
        let body = json!({ "result": [ {"id": "a", "score": 0.5, "payload": {"text": "orphan"}} ] });
        assert!(matches!(
            parse_search_hits(&body),
            Err(GatewayError::Malformed { .. })
        ));
        assert!(parse_search_hits(&json!({"status": "error"})).is_err());
    }

    #[tokio::test]
    async fn wrong_query_dimension_is_rejected_before_any_request() {
        let store = QdrantStore::new("http://127.0.0.1:9", "documents", 3);
        let result = store.query(&[1.0, 0.0], 2).await;
        assert!(matches!(
            result,
            Err(GatewayError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
