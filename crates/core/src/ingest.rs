use crate::chunking::{build_chunks, normalize_whitespace};
use crate::embeddings::{check_embeddings, EmbeddingGateway};
use crate::error::{ExtractionError, IngestError};
use crate::extractor::{is_pdf_upload, PdfExtractor};
use crate::models::{Chunk, Document, DocumentStatus, EmbeddedChunk, PdfUpload, RagOptions};
use crate::traits::{within, DocumentCatalog, VectorStoreGateway};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Extraction → chunking → embedding → storage for one PDF at a time.
/// Nothing becomes visible unless every chunk was stored and the document
/// was recorded in the catalog.
pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn EmbeddingGateway>,
    vectors: Arc<dyn VectorStoreGateway>,
    catalog: Arc<dyn DocumentCatalog>,
    options: RagOptions,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStoreGateway>,
        catalog: Arc<dyn DocumentCatalog>,
        options: RagOptions,
    ) -> Self {
        Self {
            extractor,
            embedder,
            vectors,
            catalog,
            options,
        }
    }

    pub async fn ingest(&self, upload: PdfUpload) -> Result<Document, IngestError> {
        let PdfUpload {
            filename,
            content_type,
            bytes,
        } = upload;

        if !is_pdf_upload(&filename, content_type.as_deref()) {
            return Err(IngestError::UnsupportedMediaType(
                content_type.unwrap_or_else(|| filename.clone()),
            ));
        }
        if bytes.len() > self.options.max_upload_bytes {
            return Err(IngestError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.options.max_upload_bytes,
            });
        }

        let size_bytes = bytes.len();
        let checksum = digest_bytes(&bytes);
        let text = self.extract(bytes).await?;

        let document_id = Uuid::new_v4().to_string();
        let chunks = build_chunks(
            &document_id,
            &normalize_whitespace(&text),
            self.options.chunking,
        )?;
        let batch = self.embed_chunks(chunks).await?;

        let document = Document {
            id: document_id,
            filename,
            size_bytes,
            checksum,
            uploaded_at: Utc::now(),
            chunk_count: batch.len(),
            status: DocumentStatus::Processed,
        };

        self.commit(&document, &batch).await?;

        info!(
            document_id = %document.id,
            filename = %document.filename,
            chunk_count = document.chunk_count,
            "document ingested"
        );
        Ok(document)
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<Document, IngestError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path missing filename: {}", path.display()))
            })?;

        self.ingest(PdfUpload {
            filename: filename.to_string(),
            content_type: None,
            bytes,
        })
        .await
    }

    /// Ingests every PDF below `folder`; failures are reported, not fatal.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut documents = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            match self.ingest_file(&path).await {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(IngestionReport {
            documents,
            skipped_files,
        })
    }

    async fn extract(&self, bytes: Vec<u8>) -> Result<String, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&bytes))
            .await
            .map_err(|error| ExtractionError::PdfParse(error.to_string()))??;
        Ok(text)
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        // each round trip gets the full bound, not the document as a whole
        for batch in texts.chunks(self.embedder.batch_size().max(1)) {
            let embedded = within(
                "embedding",
                self.options.gateway_timeout,
                self.embedder.embed_batch(batch),
            )
            .await?
            .and_then(|embedded| {
                check_embeddings(self.embedder.as_ref(), batch.len(), &embedded)?;
                Ok(embedded)
            })
            .map_err(|error| {
                warn!(gateway = self.embedder.name(), %error, "embedding failed during ingestion");
                IngestError::Embedding(error)
            })?;
            vectors.extend(embedded);
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect())
    }

    async fn commit(&self, document: &Document, batch: &[EmbeddedChunk]) -> Result<(), IngestError> {
        let stored = match within(
            "vector store",
            self.options.gateway_timeout,
            self.vectors.add(batch),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(IngestError::VectorStore(error)),
            Err(elapsed) => Err(IngestError::GatewayTimeout(elapsed)),
        };

        if let Err(error) = stored {
            warn!(document_id = %document.id, %error, "indexing failed");
            self.discard(&document.id).await;
            return Err(error);
        }

        if let Err(error) = self.catalog.record(document.clone()).await {
            warn!(document_id = %document.id, %error, "recording document failed");
            self.discard(&document.id).await;
            return Err(error.into());
        }

        Ok(())
    }

    async fn discard(&self, document_id: &str) {
        let removed = within(
            "vector store",
            self.options.gateway_timeout,
            self.vectors.remove_document(document_id),
        )
        .await;

        match removed {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(document_id, %error, "could not remove chunks of failed document")
            }
            Err(elapsed) => {
                warn!(document_id, %elapsed, "could not remove chunks of failed document")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::LopdfExtractor;
    use crate::stores::LocalVectorStore;
    use crate::store::RecordLog;
    use crate::testing::{
        sample_pdf, FailingCatalog, FailingEmbedder, SlowEmbedder, WrongDimensionEmbedder,
    };
    use crate::ErrorClass;
    use std::collections::BTreeMap;
    use std::fs::{self, File};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Harness {
        pipeline: IngestionPipeline,
        vectors: Arc<LocalVectorStore>,
        catalog: Arc<RecordLog<Document>>,
    }

    fn options() -> RagOptions {
        RagOptions {
            chunking: ChunkingConfig {
                chunk_size: 40,
                overlap: 10,
            },
            ..RagOptions::default()
        }
    }

    fn harness_with(embedder: Arc<dyn EmbeddingGateway>, options: RagOptions) -> Harness {
        let vectors = Arc::new(LocalVectorStore::in_memory("documents"));
        let catalog = Arc::new(RecordLog::<Document>::in_memory());
        let pipeline = IngestionPipeline::new(
            Arc::new(LopdfExtractor),
            embedder,
            vectors.clone(),
            catalog.clone(),
            options,
        );
        Harness {
            pipeline,
            vectors,
            catalog,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(CharacterNgramEmbedder::new(64)), options())
    }

    fn upload(bytes: Vec<u8>) -> PdfUpload {
        PdfUpload {
            filename: "pump-manual.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            bytes,
        }
    }

    fn manual() -> Vec<u8> {
        sample_pdf(&[
            "Section 1. The hydraulic pump must be inspected every 500 operating hours.",
            "Section 2. Relief valves are set to 210 bar and sealed after calibration.",
        ])
    }

    #[tokio::test]
    async fn ingested_document_is_listed_once_with_its_chunk_count() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness();
        let document = harness.pipeline.ingest(upload(manual())).await?;

        let listed = harness.catalog.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, document.id);
        assert_eq!(listed[0].filename, "pump-manual.pdf");
        assert_eq!(listed[0].chunk_count, document.chunk_count);
        assert!(document.chunk_count > 1);
        assert_eq!(harness.vectors.count().await?, document.chunk_count);
        assert_eq!(document.checksum, digest_bytes(&manual()));
        Ok(())
    }

    #[tokio::test]
    async fn stored_chunk_indices_are_contiguous_from_zero() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness();
        let document = harness.pipeline.ingest(upload(manual())).await?;

        let probe = CharacterNgramEmbedder::new(64).embed_text("pump");
        let mut indices: Vec<usize> = harness
            .vectors
            .query(&probe, 100)
            .await?
            .into_iter()
            .map(|found| found.chunk.chunk_index)
            .collect();
        indices.sort_unstable();

        assert_eq!(indices, (0..document.chunk_count).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn identical_uploads_are_not_deduplicated() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness();
        let first = harness.pipeline.ingest(upload(manual())).await?;
        let second = harness.pipeline.ingest(upload(manual())).await?;

        assert_ne!(first.id, second.id);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(harness.catalog.list().await.len(), 2);
        assert_eq!(harness.vectors.count().await?, first.chunk_count * 2);
        Ok(())
    }

    #[tokio::test]
    async fn non_pdf_media_type_is_rejected_before_extraction() {
        let harness = harness();
        let result = harness
            .pipeline
            .ingest(PdfUpload {
                filename: "notes.txt".to_string(),
                content_type: Some("text/plain".to_string()),
                bytes: manual(),
            })
            .await;

        let error = result.expect_err("text upload must fail");
        assert!(matches!(error, IngestError::UnsupportedMediaType(_)));
        assert_eq!(error.class(), ErrorClass::UnsupportedMediaType);
        assert!(harness.catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let harness = harness_with(
            Arc::new(CharacterNgramEmbedder::new(64)),
            RagOptions {
                max_upload_bytes: 16,
                ..options()
            },
        );

        let result = harness.pipeline.ingest(upload(manual())).await;
        assert!(matches!(result, Err(IngestError::PayloadTooLarge { limit: 16, .. })));
    }

    #[tokio::test]
    async fn malformed_pdf_is_a_client_error() {
        let harness = harness();
        let result = harness
            .pipeline
            .ingest(upload(b"%PDF-1.4\n%broken".to_vec()))
            .await;

        let error = result.expect_err("broken pdf must fail");
        assert!(matches!(error, IngestError::Extraction(_)));
        assert!(error.class().is_client_error());
        assert!(harness.catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_leaves_nothing_indexed() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(Arc::new(FailingEmbedder), options());
        let result = harness.pipeline.ingest(upload(manual())).await;

        assert!(matches!(result, Err(IngestError::Embedding(_))));
        assert_eq!(harness.vectors.count().await?, 0);
        assert!(harness.catalog.list().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_embeddings_abort_ingestion() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(Arc::new(WrongDimensionEmbedder), options());
        let result = harness.pipeline.ingest(upload(manual())).await;

        assert!(matches!(result, Err(IngestError::Embedding(_))));
        assert_eq!(harness.vectors.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn slow_embedding_gateway_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(
            Arc::new(SlowEmbedder {
                delay: Duration::from_secs(5),
            }),
            RagOptions {
                gateway_timeout: Duration::from_millis(20),
                ..options()
            },
        );

        let error = harness
            .pipeline
            .ingest(upload(manual()))
            .await
            .expect_err("must time out");
        assert!(matches!(error, IngestError::GatewayTimeout(_)));
        assert_eq!(error.class(), ErrorClass::GatewayTimeout);
        assert_eq!(harness.vectors.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn timeout_bounds_each_embedding_call_not_the_whole_document() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(
            Arc::new(SlowEmbedder {
                delay: Duration::from_millis(50),
            }),
            RagOptions {
                gateway_timeout: Duration::from_millis(200),
                ..options()
            },
        );

        let document = harness.pipeline.ingest(upload(manual())).await?;

        // together the calls take longer than one bound
        assert!(document.chunk_count > 4);
        assert_eq!(harness.vectors.count().await?, document.chunk_count);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_ingestions_keep_their_own_chunk_sequences() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(
            Arc::new(SlowEmbedder {
                delay: Duration::from_millis(5),
            }),
            options(),
        );
        let valves = sample_pdf(&[
            "Valve guide. Relief valves open at 210 bar and must be resealed after every calibration run.",
        ]);
        let wiring = sample_pdf(&[
            "Wiring guide. The control cabinet is fed by a 400 volt supply protected by a 32 ampere breaker.",
        ]);

        let (first, second, third) = tokio::join!(
            harness.pipeline.ingest(upload(manual())),
            harness.pipeline.ingest(upload(valves)),
            harness.pipeline.ingest(upload(wiring)),
        );
        let documents = [first?, second?, third?];

        let mut indices: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for found in harness.vectors.query(&[1.0; 8], 1000).await? {
            indices
                .entry(found.chunk.document_id)
                .or_default()
                .push(found.chunk.chunk_index);
        }

        assert_eq!(indices.len(), documents.len());
        for document in &documents {
            let mut stored = indices.remove(&document.id).unwrap_or_default();
            stored.sort_unstable();
            assert_eq!(stored, (0..document.chunk_count).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[tokio::test]
    async fn catalog_failure_rolls_back_stored_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let vectors = Arc::new(LocalVectorStore::in_memory("documents"));
        let pipeline = IngestionPipeline::new(
            Arc::new(LopdfExtractor),
            Arc::new(CharacterNgramEmbedder::new(64)),
            vectors.clone(),
            Arc::new(FailingCatalog),
            options(),
        );

        let result = pipeline.ingest(upload(manual())).await;
        assert!(matches!(result, Err(IngestError::Persistence(_))));
        assert_eq!(vectors.count().await?, 0);
        Ok(())
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("c.txt")).and_then(|mut file| file.write_all(b"text"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = harness().pipeline.ingest_folder(dir.path()).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(dir.path().join("manual.pdf"), manual())?;

        let harness = harness();
        let report = harness.pipeline.ingest_folder(dir.path()).await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].filename, "manual.pdf");
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }
}
