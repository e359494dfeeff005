//! Append-only JSON-lines logs for document metadata and query history.
//!
//! Each record is one line written with a single `write_all` and synced
//! before it becomes visible to readers, so a record is either fully
//! present or absent. A torn trailing line left by a crash is dropped
//! when the log is reopened; a fragment left by a failed write is cut
//! before the next append.

use crate::error::PersistenceError;
use crate::models::{Document, QueryRecord};
use crate::traits::{DocumentCatalog, HistoryStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::warn;

pub const DOCUMENTS_FILE: &str = "documents.jsonl";
pub const HISTORY_FILE: &str = "query_history.jsonl";

pub struct RecordLog<T> {
    path: Option<PathBuf>,
    records: RwLock<Vec<T>>,
}

impl<T> RecordLog<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let records = match fs::read_to_string(&path).await {
            Ok(contents) => load_lines(&path, &contents).await?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn append(&self, record: T) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;

        if let Some(path) = &self.path {
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');

            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)
                .await?;
            let end = trim_unterminated_tail(&mut file, path).await?;

            if let Err(error) = write_line(&mut file, line.as_bytes()).await {
                if let Err(rollback) = file.set_len(end).await {
                    warn!(path = %path.display(), error = %rollback, "could not roll back partial record");
                }
                return Err(error.into());
            }
        }

        records.push(record);
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn clear(&self) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        if let Some(path) = &self.path {
            fs::write(path, b"").await?;
        }
        records.clear();
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.sync_data().await
}

/// Cuts any bytes after the last newline and returns the resulting length.
async fn trim_unterminated_tail(file: &mut File, path: &Path) -> Result<u64, PersistenceError> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    file.seek(SeekFrom::Start(len - 1)).await?;
    if file.read_u8().await? == b'\n' {
        return Ok(len);
    }

    let contents = fs::read(path).await?;
    let end = contents
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |position| position as u64 + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = len - end,
        "dropping unterminated record fragment"
    );
    file.set_len(end).await?;
    Ok(end)
}

async fn load_lines<T>(path: &Path, contents: &str) -> Result<Vec<T>, PersistenceError>
where
    T: Serialize + DeserializeOwned,
{
    let lines: Vec<&str> = contents.lines().collect();
    let mut records = Vec::with_capacity(lines.len());
    let mut torn_tail = false;

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(_) if index + 1 == lines.len() => {
                warn!(path = %path.display(), line = index + 1, "dropping torn trailing record");
                torn_tail = true;
            }
            Err(_) => {
                return Err(PersistenceError::Corrupt {
                    path: path.display().to_string(),
                    line: index + 1,
                })
            }
        }
    }

    if torn_tail || (!contents.is_empty() && !contents.ends_with('\n')) {
        let mut rewritten = String::new();
        for record in &records {
            rewritten.push_str(&serde_json::to_string(record)?);
            rewritten.push('\n');
        }
        fs::write(path, rewritten).await?;
    }

    Ok(records)
}

#[async_trait]
impl DocumentCatalog for RecordLog<Document> {
    async fn record(&self, document: Document) -> Result<(), PersistenceError> {
        self.append(document).await
    }

    async fn list(&self) -> Vec<Document> {
        let mut documents = self.snapshot().await;
        documents.sort_by_key(|document| document.uploaded_at);
        documents
    }

    async fn get(&self, id: &str) -> Option<Document> {
        self.records
            .read()
            .await
            .iter()
            .find(|document| document.id == id)
            .cloned()
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        RecordLog::clear(self).await
    }
}

#[async_trait]
impl HistoryStore for RecordLog<QueryRecord> {
    async fn append(&self, record: QueryRecord) -> Result<(), PersistenceError> {
        RecordLog::append(self, record).await
    }

    async fn list(&self, limit: usize) -> Vec<QueryRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    async fn total(&self) -> usize {
        self.len().await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        RecordLog::clear(self).await
    }
}
