use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    PayloadTooLarge,
    UnsupportedMediaType,
    BadGateway,
    GatewayTimeout,
    Internal,
}

impl ErrorClass {
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorClass::BadRequest
                | ErrorClass::NotFound
                | ErrorClass::PayloadTooLarge
                | ErrorClass::UnsupportedMediaType
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("payload is not a pdf document")]
    NotPdf,

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf has no pages")]
    NoPages,

    #[error("no text content found in pdf")]
    NoText,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record in {path} at line {line}")]
    Corrupt { path: String, line: usize },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed output from {backend}: {details}")]
    Malformed { backend: String, details: String },

    #[error("vector dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl GatewayError {
    pub fn malformed(backend: &str, details: impl Into<String>) -> Self {
        Self::Malformed {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

/// A gateway call that did not finish within its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub gateway: &'static str,
    pub after: Duration,
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gateway timed out after {:?}", self.gateway, self.after)
    }
}

impl std::error::Error for TimedOut {}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("only pdf files are supported, got {0}")]
    UnsupportedMediaType(String),

    #[error("file size {size} exceeds maximum limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid or corrupted pdf file: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("embedding failed: {0}")]
    Embedding(#[source] GatewayError),

    #[error("failed to index document: {0}")]
    VectorStore(#[source] GatewayError),

    #[error(transparent)]
    GatewayTimeout(#[from] TimedOut),

    #[error("failed to record document: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IngestError::UnsupportedMediaType(_) => ErrorClass::UnsupportedMediaType,
            IngestError::PayloadTooLarge { .. } => ErrorClass::PayloadTooLarge,
            IngestError::Extraction(_) | IngestError::InvalidArgument(_) => {
                ErrorClass::BadRequest
            }
            IngestError::Embedding(_) => ErrorClass::BadGateway,
            IngestError::GatewayTimeout(_) => ErrorClass::GatewayTimeout,
            IngestError::VectorStore(_)
            | IngestError::Persistence(_)
            | IngestError::Configuration(_)
            | IngestError::Io(_) => ErrorClass::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question cannot be empty")]
    EmptyQuestion,

    #[error("embedding failed: {0}")]
    Embedding(#[source] GatewayError),

    #[error("vector search failed: {0}")]
    VectorStore(#[source] GatewayError),

    #[error("answer generation failed: {0}")]
    Generation(#[source] GatewayError),

    #[error(transparent)]
    GatewayTimeout(#[from] TimedOut),

    #[error("failed to record query: {0}")]
    Persistence(#[from] PersistenceError),
}

impl QueryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            QueryError::EmptyQuestion => ErrorClass::BadRequest,
            QueryError::Embedding(_) | QueryError::Generation(_) => ErrorClass::BadGateway,
            QueryError::GatewayTimeout(_) => ErrorClass::GatewayTimeout,
            QueryError::VectorStore(_) | QueryError::Persistence(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
