//! Fake gateways and PDF fixtures shared by tests.
//!
//! Compiled for this crate's own tests and, behind the `test-util` feature,
//! for dependent crates.

use crate::embeddings::EmbeddingGateway;
use crate::error::{GatewayError, PersistenceError};
use crate::models::{ChunkMatch, Document, EmbeddedChunk, QueryRecord};
use crate::traits::{DocumentCatalog, HistoryStore, LlmGateway, VectorStoreGateway};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Builds a small PDF with one text line per page.
pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for page_text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*page_text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content encodes"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf saves");
    bytes
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingGateway for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        Err(GatewayError::BackendResponse {
            backend: "failing".to_string(),
            details: "503 Service Unavailable".to_string(),
        })
    }
}

/// Advertises one dimension but returns vectors of another.
pub struct WrongDimensionEmbedder;

#[async_trait]
impl EmbeddingGateway for WrongDimensionEmbedder {
    fn name(&self) -> &str {
        "wrong-dimension"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        Ok(vec![0.5; 3])
    }
}

pub struct SlowEmbedder {
    pub delay: Duration,
}

#[async_trait]
impl EmbeddingGateway for SlowEmbedder {
    fn name(&self) -> &str {
        "slow"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0; 8])
    }
}

/// Echoes the prompt back and records how often it was called.
#[derive(Default)]
pub struct RecordingLlm {
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok().and_then(|prompts| prompts.last().cloned())
    }
}

#[async_trait]
impl LlmGateway for RecordingLlm {
    fn model(&self) -> &str {
        "recording"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok("generated answer".to_string())
    }
}

pub struct FailingLlm;

#[async_trait]
impl LlmGateway for FailingLlm {
    fn model(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
        Err(GatewayError::BackendResponse {
            backend: "failing".to_string(),
            details: "500 Internal Server Error".to_string(),
        })
    }
}

pub struct FailingCatalog;

#[async_trait]
impl DocumentCatalog for FailingCatalog {
    async fn record(&self, _document: Document) -> Result<(), PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::other("disk full")))
    }

    async fn list(&self) -> Vec<Document> {
        Vec::new()
    }

    async fn get(&self, _id: &str) -> Option<Document> {
        None
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::other("read-only file system")))
    }
}

pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    async fn append(&self, _record: QueryRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::other("disk full")))
    }

    async fn list(&self, _limit: usize) -> Vec<QueryRecord> {
        Vec::new()
    }

    async fn total(&self) -> usize {
        0
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// A backend that accepts the connection and never answers.
pub struct StalledVectorStore;

#[async_trait]
impl VectorStoreGateway for StalledVectorStore {
    fn collection_name(&self) -> &str {
        "stalled"
    }

    async fn add(&self, _batch: &[EmbeddedChunk]) -> Result<(), GatewayError> {
        std::future::pending().await
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<ChunkMatch>, GatewayError> {
        std::future::pending().await
    }

    async fn count(&self) -> Result<usize, GatewayError> {
        std::future::pending().await
    }

    async fn remove_document(&self, _document_id: &str) -> Result<(), GatewayError> {
        std::future::pending().await
    }

    async fn reset(&self) -> Result<(), GatewayError> {
        std::future::pending().await
    }
}
