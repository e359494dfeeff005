use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Args, ValueEnum};
use pdf_rag_core::providers::gemini::{DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_URL};
use pdf_rag_core::providers::ollama::DEFAULT_OLLAMA_URL;
use pdf_rag_core::providers::openai::{DEFAULT_OPENAI_EMBEDDING_MODEL, DEFAULT_OPENAI_URL};
use pdf_rag_core::{
    CharacterNgramEmbedder, ChunkingConfig, Document, EmbeddingGateway, GatewayError, Gateways,
    GeminiClient,
    KnowledgeBase, LlmGateway, LocalVectorStore, LopdfExtractor, OllamaClient, OpenAiEmbedder,
    QdrantStore, QueryRecord, RagOptions, RecordLog, VectorStoreGateway, DOCUMENTS_FILE,
    HISTORY_FILE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_OLLAMA_LLM_MODEL: &str = "llama3";
const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingProvider {
    /// Local character n-gram hashing, no network access.
    Ngram,
    Openai,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LlmProvider {
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VectorBackend {
    /// JSON snapshot under the data directory.
    Local,
    Qdrant,
}

/// What a command does with the knowledge base. Only answering needs an LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Answering,
    Indexing,
}

/// Placeholder for commands that never generate an answer.
struct NoLlm;

#[async_trait]
impl LlmGateway for NoLlm {
    fn model(&self) -> &str {
        "none"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
        Err(GatewayError::BackendResponse {
            backend: "llm".to_string(),
            details: "no LLM configured for this command".to_string(),
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Address the HTTP server listens on
    #[arg(long, env = "PDF_RAG_BIND", default_value = "0.0.0.0:8000", global = true)]
    pub bind: String,

    /// Directory holding the vector snapshot, document catalog and query history
    #[arg(long, env = "VECTOR_DB_PATH", default_value = "./vector_db", global = true)]
    pub data_dir: PathBuf,

    /// Chunk size in characters
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000, global = true)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 200, global = true)]
    pub chunk_overlap: usize,

    /// Sources retrieved per question when the request does not say
    #[arg(long, env = "MAX_RESULTS", default_value_t = 5, global = true)]
    pub max_results: usize,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = 10 * 1024 * 1024, global = true)]
    pub max_file_size: usize,

    /// Bound on every embedding, vector store and LLM call
    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub gateway_timeout_secs: u64,

    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProvider::Ngram, global = true)]
    pub embedding_provider: EmbeddingProvider,

    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    pub embedding_model: Option<String>,

    #[arg(long, env = "EMBEDDING_URL", global = true)]
    pub embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = 384, global = true)]
    pub embedding_dimensions: usize,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value_t = LlmProvider::Gemini, global = true)]
    pub llm_provider: LlmProvider,

    #[arg(long, env = "LLM_MODEL", global = true)]
    pub llm_model: Option<String>,

    #[arg(long, env = "LLM_URL", global = true)]
    pub llm_url: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "VECTOR_STORE", value_enum, default_value_t = VectorBackend::Local, global = true)]
    pub vector_store: VectorBackend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    pub qdrant_url: String,

    /// Collection the chunks are stored in
    #[arg(long, env = "COLLECTION_NAME", default_value = "documents", global = true)]
    pub collection: String,
}

impl Settings {
    pub fn rag_options(&self) -> RagOptions {
        RagOptions {
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
            },
            top_k: self.max_results,
            max_upload_bytes: self.max_file_size,
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
            ..RagOptions::default()
        }
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn EmbeddingGateway>> {
        let dimensions = self.embedding_dimensions;
        if dimensions == 0 {
            bail!("EMBEDDING_DIMENSIONS must be greater than zero");
        }

        let embedder: Arc<dyn EmbeddingGateway> = match self.embedding_provider {
            EmbeddingProvider::Ngram => Arc::new(CharacterNgramEmbedder::new(dimensions)),
            EmbeddingProvider::Openai => Arc::new(
                OpenAiEmbedder::new(
                    self.embedding_url.as_deref().unwrap_or(DEFAULT_OPENAI_URL),
                    self.embedding_model
                        .as_deref()
                        .unwrap_or(DEFAULT_OPENAI_EMBEDDING_MODEL),
                    self.openai_api_key.clone(),
                    dimensions,
                )
                .context("invalid EMBEDDING_URL")?,
            ),
            EmbeddingProvider::Ollama => Arc::new(
                OllamaClient::new(
                    self.embedding_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
                    self.embedding_model
                        .as_deref()
                        .unwrap_or(DEFAULT_OLLAMA_EMBEDDING_MODEL),
                )
                .context("invalid EMBEDDING_URL")?
                .with_dimensions(dimensions),
            ),
        };
        Ok(embedder)
    }

    fn llm(&self) -> anyhow::Result<Arc<dyn LlmGateway>> {
        let llm: Arc<dyn LlmGateway> = match self.llm_provider {
            LlmProvider::Gemini => {
                let Some(api_key) = self.gemini_api_key.as_deref().filter(|key| !key.trim().is_empty())
                else {
                    bail!("GEMINI_API_KEY not configured. Please set the environment variable.");
                };
                Arc::new(
                    GeminiClient::new(
                        self.llm_url.as_deref().unwrap_or(DEFAULT_GEMINI_URL),
                        self.llm_model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL),
                        api_key,
                    )
                    .context("invalid LLM_URL")?,
                )
            }
            LlmProvider::Ollama => Arc::new(
                OllamaClient::new(
                    self.llm_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
                    self.llm_model.as_deref().unwrap_or(DEFAULT_OLLAMA_LLM_MODEL),
                )
                .context("invalid LLM_URL")?,
            ),
        };
        Ok(llm)
    }

    async fn vector_store(&self, dimensions: usize) -> anyhow::Result<Arc<dyn VectorStoreGateway>> {
        let store: Arc<dyn VectorStoreGateway> = match self.vector_store {
            VectorBackend::Local => Arc::new(
                LocalVectorStore::open(&self.data_dir, self.collection.clone())
                    .await
                    .with_context(|| format!("opening vector store in {}", self.data_dir.display()))?,
            ),
            VectorBackend::Qdrant => {
                let store = QdrantStore::new(&self.qdrant_url, &self.collection, dimensions);
                store
                    .ensure_collection()
                    .await
                    .with_context(|| format!("preparing qdrant collection {}", self.collection))?;
                Arc::new(store)
            }
        };
        Ok(store)
    }

    /// Builds the gateways `purpose` needs and the knowledge base on top of
    /// them. Indexing commands skip the LLM and its credentials.
    pub async fn build_knowledge_base(&self, purpose: Purpose) -> anyhow::Result<KnowledgeBase> {
        let options = self.rag_options();
        options.validate()?;

        let embedder = self.embedder()?;
        let llm: Arc<dyn LlmGateway> = match purpose {
            Purpose::Answering => self.llm()?,
            Purpose::Indexing => Arc::new(NoLlm),
        };
        let vectors = self.vector_store(embedder.dimensions()).await?;
        let catalog = RecordLog::<Document>::open(self.data_dir.join(DOCUMENTS_FILE))
            .await
            .context("opening document catalog")?;
        let history = RecordLog::<QueryRecord>::open(self.data_dir.join(HISTORY_FILE))
            .await
            .context("opening query history")?;

        info!(
            data_dir = %self.data_dir.display(),
            embedder = embedder.name(),
            llm = llm.model(),
            collection = vectors.collection_name(),
            "knowledge base ready"
        );

        let knowledge = KnowledgeBase::new(
            Gateways {
                extractor: Arc::new(LopdfExtractor),
                embedder,
                vectors,
                llm,
                catalog: Arc::new(catalog),
                history: Arc::new(history),
            },
            options,
        )?;
        Ok(knowledge)
    }
}
