pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod service;
pub mod store;
pub mod stores;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use chunking::{build_chunks, chunk_text, normalize_whitespace, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingGateway, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, ErrorClass, ExtractionError, GatewayError, IngestError, PersistenceError,
    QueryError, TimedOut,
};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use ingest::{discover_pdf_files, IngestionPipeline, IngestionReport, SkippedPdf};
pub use models::{
    Answer, Chunk, ChunkMatch, CollectionStats, Document, DocumentStatus, EmbeddedChunk,
    PdfUpload, QueryRecord, RagOptions, SourceRef,
};
pub use orchestrator::{build_prompt, QueryPipeline, NO_DOCUMENTS_ANSWER};
pub use providers::{GeminiClient, OllamaClient, OpenAiEmbedder};
pub use service::{Gateways, KnowledgeBase};
pub use store::{RecordLog, DOCUMENTS_FILE, HISTORY_FILE};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::{DocumentCatalog, HistoryStore, LlmGateway, VectorStoreGateway};
