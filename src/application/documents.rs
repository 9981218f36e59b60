//! Website document catalog, cached reads and refresh requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::application::jobs::{JobQueue, QueueError};
use crate::application::refresh::DocumentRefreshJob;
use crate::application::repos::{DocumentStorage, StorageError};
use crate::cache::{
    CacheKey, CachePolicy, CacheStore, CacheableQuery, CachedQueryHandler, QueryHandler, Tag,
};
use crate::domain::documents::{DocumentId, TriggeredBy, WebsiteDocument};

const KEY_CONTEXT: &str = "website";
const KEY_KIND: &str = "doc";
pub const DEFAULT_CONTENT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// `website:doc:<id>:content`
pub fn content_key(id: &DocumentId) -> CacheKey {
    CacheKey::build(KEY_CONTEXT, KEY_KIND, id.as_str(), &["content"])
}

/// `website:doc:<id>:refresh-state`
pub fn state_key(id: &DocumentId) -> CacheKey {
    CacheKey::build(KEY_CONTEXT, KEY_KIND, id.as_str(), &["refresh-state"])
}

/// Tag shared by every published document.
pub fn documents_tag() -> Tag {
    Tag::new("website:documents")
}

pub fn document_tag(id: &DocumentId) -> Tag {
    Tag::new(format!("website:document:{id}"))
}

pub fn document_tags(id: &DocumentId) -> Vec<Tag> {
    vec![documents_tag(), document_tag(id)]
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unknown document `{0}`")]
    Unknown(String),
    #[error("document `{0}` has not been published yet")]
    NotSynced(DocumentId),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The set of documents this site publishes.
#[derive(Debug, Clone, Default)]
pub struct DocumentCatalog {
    documents: BTreeMap<DocumentId, WebsiteDocument>,
}

impl DocumentCatalog {
    pub fn new(documents: impl IntoIterator<Item = WebsiteDocument>) -> Self {
        Self {
            documents: documents
                .into_iter()
                .map(|document| (document.id.clone(), document))
                .collect(),
        }
    }

    pub fn get(&self, id: &DocumentId) -> Option<&WebsiteDocument> {
        self.documents.get(id)
    }

    /// Look up a document by an untrusted identifier.
    pub fn resolve(&self, raw: &str) -> Result<&WebsiteDocument, DocumentError> {
        let id = DocumentId::parse(raw).map_err(|_| DocumentError::Unknown(raw.to_string()))?;
        self.get(&id)
            .ok_or_else(|| DocumentError::Unknown(raw.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WebsiteDocument> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Read a published document.
#[derive(Debug, Clone)]
pub struct GetDocumentQuery {
    pub document: WebsiteDocument,
}

impl CacheableQuery for GetDocumentQuery {
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new(content_key(&self.document.id))
            .with_ttl(self.document.content_ttl)
            .with_tags(document_tags(&self.document.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub title: String,
    pub html: String,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

/// Loads the published copy of a document from storage.
#[derive(Clone)]
pub struct DocumentQueryHandler {
    storage: Arc<dyn DocumentStorage>,
}

impl DocumentQueryHandler {
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl QueryHandler<GetDocumentQuery> for DocumentQueryHandler {
    type Output = Result<DocumentView, DocumentError>;

    async fn handle(&self, query: &GetDocumentQuery) -> Self::Output {
        let document = &query.document;
        let stored = self
            .storage
            .download(&document.container, &document.blob_name)
            .await?
            .ok_or_else(|| DocumentError::NotSynced(document.id.clone()))?;

        Ok(DocumentView {
            id: document.id.clone(),
            title: document.title.clone(),
            html: stored.content,
            synced_at: stored.metadata.synced_at,
        })
    }
}

pub type CachedDocumentQuery = CachedQueryHandler<DocumentQueryHandler, GetDocumentQuery>;

/// Ask for a document to be fetched again and republished.
#[derive(Debug, Clone)]
pub struct RefreshDocumentCommand {
    pub document: String,
    pub triggered_by: TriggeredBy,
}

#[derive(Clone)]
pub struct DocumentService {
    catalog: Arc<DocumentCatalog>,
    query: Arc<CachedDocumentQuery>,
    queue: Arc<dyn JobQueue>,
}

impl DocumentService {
    pub fn new(
        catalog: Arc<DocumentCatalog>,
        storage: Arc<dyn DocumentStorage>,
        cache: CacheStore,
        cache_enabled: bool,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let query = CachedQueryHandler::cacheable(
            DocumentQueryHandler::new(storage),
            cache,
            cache_enabled,
        );
        Self {
            catalog,
            query: Arc::new(query),
            queue,
        }
    }

    pub fn catalog(&self) -> &DocumentCatalog {
        &self.catalog
    }

    #[instrument(skip(self))]
    pub async fn document(&self, id: &str) -> Result<DocumentView, DocumentError> {
        let document = self.catalog.resolve(id)?.clone();
        self.query.handle(&GetDocumentQuery { document }).await
    }

    /// Enqueue a refresh and return its job id without waiting for it.
    #[instrument(skip(self, command), fields(document = %command.document))]
    pub fn request_refresh(&self, command: RefreshDocumentCommand) -> Result<String, DocumentError> {
        let document = self.catalog.resolve(&command.document)?;
        let job = DocumentRefreshJob::new(document, command.triggered_by);
        let job_id = self.queue.enqueue(job)?;
        info!(job_id = %job_id, "Document refresh enqueued");
        Ok(job_id)
    }
}

/// Documents published when none are configured.
pub fn default_documents() -> Vec<WebsiteDocument> {
    [
        ("bylaws", "Bylaws", "Bylaws"),
        ("tournament-rules", "Tournament Rules", "Tournament Rules"),
    ]
    .into_iter()
    .filter_map(|(id, title, source_name)| {
        let id = DocumentId::parse(id).ok()?;
        Some(WebsiteDocument {
            blob_name: format!("{id}.html"),
            container: "documents".to_string(),
            id,
            title: title.to_string(),
            source_name: source_name.to_string(),
            content_ttl: DEFAULT_CONTENT_TTL,
        })
    })
    .collect()
}
