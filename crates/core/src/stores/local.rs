//! File-backed vector store with exact cosine search.
//!
//! The whole collection is kept in memory and persisted as a JSON snapshot.
//! Every mutation writes a complete new snapshot to a temp file and renames
//! it over the old one; memory is only updated after the rename succeeded.
//! Once a mutation holds the write lock it runs to completion on its own
//! task, so a caller that gives up cannot leave disk and memory apart.

use crate::embeddings::cosine_similarity;
use crate::error::{GatewayError, PersistenceError};
use crate::models::{Chunk, ChunkMatch, EmbeddedChunk};
use crate::traits::VectorStoreGateway;
use async_trait::async_trait;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    document_id: String,
    chunk_index: usize,
    text: String,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct Collection {
    dimensions: Option<usize>,
    records: Vec<StoredVector>,
}

/// Borrowed view of a collection state that has not been committed yet.
struct PendingSnapshot<'a> {
    dimensions: Option<usize>,
    kept: &'a [StoredVector],
    filter_out: Option<&'a str>,
    added: &'a [StoredVector],
}

impl Serialize for PendingSnapshot<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Records<'a>(&'a PendingSnapshot<'a>);

        impl Serialize for Records<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let filter_out = self.0.filter_out;
                serializer.collect_seq(
                    self.0
                        .kept
                        .iter()
                        .filter(|record| Some(record.document_id.as_str()) != filter_out)
                        .chain(self.0.added.iter()),
                )
            }
        }

        let mut state = serializer.serialize_struct("Collection", 2)?;
        state.serialize_field("dimensions", &self.dimensions)?;
        state.serialize_field("records", &Records(self))?;
        state.end()
    }
}

pub struct LocalVectorStore {
    name: String,
    path: Option<PathBuf>,
    collection: Arc<RwLock<Collection>>,
}

impl LocalVectorStore {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            collection: Arc::new(RwLock::new(Collection::default())),
        }
    }

    /// Opens `<dir>/<name>.json`, creating the directory when needed.
    pub async fn open(dir: &Path, name: impl Into<String>) -> Result<Self, PersistenceError> {
        let name = name.into();
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{name}.json"));

        let collection = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collection>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Collection::default(),
            Err(error) => return Err(error.into()),
        };

        info!(
            collection = %name,
            path = %path.display(),
            chunks = collection.records.len(),
            "opened local vector store"
        );

        Ok(Self {
            name,
            path: Some(path),
            collection: Arc::new(RwLock::new(collection)),
        })
    }

    async fn lock_for_write(&self) -> OwnedRwLockWriteGuard<Collection> {
        Arc::clone(&self.collection).write_owned().await
    }
}

async fn persist(path: Option<&Path>, snapshot: &PendingSnapshot<'_>) -> Result<(), PersistenceError> {
    let Some(path) = path else {
        return Ok(());
    };

    let bytes = serde_json::to_vec(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &bytes).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Runs a mutation on its own task so dropping the caller does not cancel it.
async fn run_to_completion<F>(mutation: F) -> Result<(), GatewayError>
where
    F: Future<Output = Result<(), PersistenceError>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|error| PersistenceError::Io(std::io::Error::other(error)))??;
    Ok(())
}

#[async_trait]
impl VectorStoreGateway for LocalVectorStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn add(&self, batch: &[EmbeddedChunk]) -> Result<(), GatewayError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };

        let mut collection = self.lock_for_write().await;
        let dimensions = collection.dimensions.unwrap_or(first.embedding.len());

        if let Some(bad) = batch
            .iter()
            .find(|entry| entry.embedding.len() != dimensions)
        {
            return Err(GatewayError::DimensionMismatch {
                expected: dimensions,
                actual: bad.embedding.len(),
            });
        }

        let added: Vec<StoredVector> = batch
            .iter()
            .map(|entry| StoredVector {
                document_id: entry.chunk.document_id.clone(),
                chunk_index: entry.chunk.chunk_index,
                text: entry.chunk.text.clone(),
                vector: entry.embedding.clone(),
            })
            .collect();

        let path = self.path.clone();
        run_to_completion(async move {
            persist(
                path.as_deref(),
                &PendingSnapshot {
                    dimensions: Some(dimensions),
                    kept: &collection.records,
                    filter_out: None,
                    added: &added,
                },
            )
            .await?;

            collection.dimensions = Some(dimensions);
            collection.records.extend(added);
            Ok(())
        })
        .await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkMatch>, GatewayError> {
        let collection = self.collection.read().await;
        if k == 0 || collection.records.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(expected) = collection.dimensions {
            if vector.len() != expected {
                return Err(GatewayError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = collection
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (position, cosine_similarity(vector, &record.vector)))
            .collect();

        // stable: equal scores keep insertion order
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| {
                let record = &collection.records[position];
                ChunkMatch {
                    chunk: Chunk {
                        document_id: record.document_id.clone(),
                        chunk_index: record.chunk_index,
                        text: record.text.clone(),
                    },
                    score,
                }
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, GatewayError> {
        Ok(self.collection.read().await.records.len())
    }

    async fn remove_document(&self, document_id: &str) -> Result<(), GatewayError> {
        let mut collection = self.lock_for_write().await;
        if !collection
            .records
            .iter()
            .any(|record| record.document_id == document_id)
        {
            return Ok(());
        }

        let path = self.path.clone();
        let document_id = document_id.to_string();
        run_to_completion(async move {
            persist(
                path.as_deref(),
                &PendingSnapshot {
                    dimensions: collection.dimensions,
                    kept: &collection.records,
                    filter_out: Some(document_id.as_str()),
                    added: &[],
                },
            )
            .await?;

            collection
                .records
                .retain(|record| record.document_id != document_id);
            Ok(())
        })
        .await
    }

    async fn reset(&self) -> Result<(), GatewayError> {
        let mut collection = self.lock_for_write().await;
        let path = self.path.clone();
        run_to_completion(async move {
            persist(
                path.as_deref(),
                &PendingSnapshot {
                    dimensions: None,
                    kept: &[],
                    filter_out: None,
                    added: &[],
                },
            )
            .await?;

            *collection = Collection::default();
            Ok(())
        })
        .await?;

        info!(collection = %self.name, "vector store reset");
        Ok(())
    }
}
