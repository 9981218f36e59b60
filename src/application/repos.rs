//! Traits describing the external services documents flow through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::documents::TriggeredBy;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document `{name}` not found at source")]
    NotFound { name: String },
    #[error("document source returned status {status} for `{name}`")]
    Status { name: String, status: u16 },
    #[error("document source returned an empty body for `{name}`")]
    Empty { name: String },
    #[error("document source request failed: {0}")]
    Transport(String),
    #[error("document source misconfigured: {0}")]
    Configuration(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage metadata is corrupt: {0}")]
    Metadata(String),
}

/// Metadata written alongside every published document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
    pub sha256: String,
    pub source: String,
    pub triggered_by: TriggeredBy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Fetches raw HTML for a document by the name the source knows it by.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, SourceError>;
}

/// Durable object storage addressed by container and name.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing has been uploaded under that name yet.
    async fn download(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<StoredDocument>, StorageError>;
}
