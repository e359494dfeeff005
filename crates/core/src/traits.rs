use crate::error::{GatewayError, PersistenceError, TimedOut};
use crate::models::{ChunkMatch, Document, EmbeddedChunk, QueryRecord};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait VectorStoreGateway: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Stores the batch as one unit: either every entry becomes visible or none does.
    async fn add(&self, batch: &[EmbeddedChunk]) -> Result<(), GatewayError>;

    /// Top-`k` matches by descending similarity; ties keep insertion order.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkMatch>, GatewayError>;

    async fn count(&self) -> Result<usize, GatewayError>;

    async fn remove_document(&self, document_id: &str) -> Result<(), GatewayError>;

    async fn reset(&self) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn record(&self, document: Document) -> Result<(), PersistenceError>;

    /// All documents ordered by upload time.
    async fn list(&self) -> Vec<Document>;

    async fn get(&self, id: &str) -> Option<Document>;

    async fn clear(&self) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: QueryRecord) -> Result<(), PersistenceError>;

    /// The most recent `limit` records, newest first.
    async fn list(&self, limit: usize) -> Vec<QueryRecord>;

    async fn total(&self) -> usize;

    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// Runs a gateway call under a deadline.
pub async fn within<T>(
    gateway: &'static str,
    after: Duration,
    call: impl Future<Output = T>,
) -> Result<T, TimedOut> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| TimedOut { gateway, after })
}

#[cfg(test)]
mod tests {
    use super::within;
    use std::time::Duration;

    #[tokio::test]
    async fn slow_calls_time_out_with_the_gateway_name() {
        let result = within("llm", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        })
        .await;

        let elapsed = result.expect_err("call should time out");
        assert_eq!(elapsed.gateway, "llm");
        assert_eq!(elapsed.after, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = within("embedding", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
