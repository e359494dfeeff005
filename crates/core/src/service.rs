use crate::embeddings::EmbeddingGateway;
use crate::error::{ConfigError, IngestError, PersistenceError, QueryError};
use crate::extractor::PdfExtractor;
use crate::ingest::{IngestionPipeline, IngestionReport};
use crate::models::{Answer, CollectionStats, Document, PdfUpload, QueryRecord, RagOptions};
use crate::orchestrator::QueryPipeline;
use crate::traits::{within, DocumentCatalog, HistoryStore, LlmGateway, VectorStoreGateway};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// The collaborators a knowledge base is assembled from.
pub struct Gateways {
    pub extractor: Arc<dyn PdfExtractor>,
    pub embedder: Arc<dyn EmbeddingGateway>,
    pub vectors: Arc<dyn VectorStoreGateway>,
    pub llm: Arc<dyn LlmGateway>,
    pub catalog: Arc<dyn DocumentCatalog>,
    pub history: Arc<dyn HistoryStore>,
}

/// Uploads, questions and the listings around them, sharing one set of stores.
pub struct KnowledgeBase {
    ingestion: IngestionPipeline,
    queries: QueryPipeline,
    vectors: Arc<dyn VectorStoreGateway>,
    catalog: Arc<dyn DocumentCatalog>,
    history: Arc<dyn HistoryStore>,
    gateway_timeout: Duration,
}

impl KnowledgeBase {
    pub fn new(gateways: Gateways, options: RagOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let gateway_timeout = options.gateway_timeout;

        let Gateways {
            extractor,
            embedder,
            vectors,
            llm,
            catalog,
            history,
        } = gateways;

        let ingestion = IngestionPipeline::new(
            extractor,
            Arc::clone(&embedder),
            Arc::clone(&vectors),
            Arc::clone(&catalog),
            options.clone(),
        );
        let queries = QueryPipeline::new(
            embedder,
            Arc::clone(&vectors),
            llm,
            Arc::clone(&history),
            options,
        );

        Ok(Self {
            ingestion,
            queries,
            vectors,
            catalog,
            history,
            gateway_timeout,
        })
    }

    pub async fn upload(&self, upload: PdfUpload) -> Result<Document, IngestError> {
        self.ingestion.ingest(upload).await
    }

    /// Ingests a single PDF file or every PDF below a folder.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        if path.is_dir() {
            return self.ingestion.ingest_folder(path).await;
        }

        let document = self.ingestion.ingest_file(path).await?;
        Ok(IngestionReport {
            documents: vec![document],
            skipped_files: Vec::new(),
        })
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.catalog.list().await
    }

    pub async fn document(&self, id: &str) -> Option<Document> {
        self.catalog.get(id).await
    }

    pub async fn stats(&self) -> Result<CollectionStats, IngestError> {
        let total_chunks = within("vector store", self.gateway_timeout, self.vectors.count())
            .await?
            .map_err(IngestError::VectorStore)?;

        Ok(CollectionStats {
            total_chunks,
            collection_name: self.vectors.collection_name().to_string(),
            total_documents: self.catalog.list().await.len(),
        })
    }

    /// Drops every indexed chunk and the document catalog. History is kept.
    ///
    /// Chunks go first so a half-finished reset never serves sources for
    /// documents that are no longer listed.
    pub async fn reset_documents(&self) -> Result<(), IngestError> {
        within("vector store", self.gateway_timeout, self.vectors.reset())
            .await?
            .map_err(IngestError::VectorStore)?;

        if let Err(failure) = self.catalog.clear().await {
            error!(
                collection = self.vectors.collection_name(),
                error = %failure,
                "chunks were dropped but the document catalog was not cleared; listed documents have no chunks"
            );
            return Err(failure.into());
        }

        info!(collection = self.vectors.collection_name(), "documents cleared");
        Ok(())
    }

    pub async fn ask(&self, question: &str, max_results: Option<usize>) -> Result<Answer, QueryError> {
        self.queries.ask(question, max_results).await
    }

    /// Up to `limit` most recent records, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<QueryRecord> {
        let mut records = self.history.list(limit).await;
        records.reverse();
        records
    }

    pub async fn history_total(&self) -> usize {
        self.history.total().await
    }

    pub async fn clear_history(&self) -> Result<(), PersistenceError> {
        self.history.clear().await?;
        info!("query history cleared");
        Ok(())
    }
}
