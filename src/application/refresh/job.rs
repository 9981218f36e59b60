use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::application::documents::{document_tag, state_key};
use crate::application::repos::{
    DocumentMetadata, DocumentSource, DocumentStorage, SourceError, StorageError,
};
use crate::cache::{CacheKey, CacheStore};
use crate::domain::documents::{
    DocumentId, DocumentRefreshJobState, RefreshStatus, TriggeredBy, WebsiteDocument,
};

use super::channels::RefreshChannelRegistry;

const METRIC_REFRESH_JOB_MS: &str = "pinfall_refresh_job_ms";
const METRIC_REFRESH_JOB_TOTAL: &str = "pinfall_refresh_job_total";
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One refresh of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRefreshJob {
    pub job_id: String,
    /// Also names the channel observers listen on.
    pub document_id: DocumentId,
    pub source_name: String,
    pub container: String,
    pub blob_name: String,
    /// Where the last known state is kept.
    pub state_key: CacheKey,
    pub triggered_by: TriggeredBy,
}

impl DocumentRefreshJob {
    pub fn new(document: &WebsiteDocument, triggered_by: TriggeredBy) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            source_name: document.source_name.clone(),
            container: document.container.clone(),
            blob_name: document.blob_name.clone(),
            state_key: state_key(&document.id),
            triggered_by,
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to fetch document: {0}")]
    Fetch(#[from] SourceError),
    #[error("failed to upload document: {0}")]
    Upload(#[from] StorageError),
}

/// Runs refresh jobs: fetch, upload, record state, notify, invalidate.
pub struct DocumentRefresher {
    source: Arc<dyn DocumentSource>,
    storage: Arc<dyn DocumentStorage>,
    cache: CacheStore,
    channels: Arc<RefreshChannelRegistry>,
    state_ttl: Duration,
}

impl DocumentRefresher {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        storage: Arc<dyn DocumentStorage>,
        cache: CacheStore,
        channels: Arc<RefreshChannelRegistry>,
    ) -> Self {
        Self {
            source,
            storage,
            cache,
            channels,
            state_ttl: DEFAULT_STATE_TTL,
        }
    }

    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    /// Run `job` to completion. A failure is recorded as `Failed` before it
    /// is returned; nothing is retried here.
    #[instrument(
        skip(self, job),
        fields(
            job_id = %job.job_id,
            document = %job.document_id,
            triggered_by = job.triggered_by.as_str()
        )
    )]
    pub async fn run(&self, job: &DocumentRefreshJob) -> Result<(), RefreshError> {
        let started = Instant::now();
        let mut state = DocumentRefreshJobState::started(
            job.document_id.clone(),
            job.job_id.clone(),
            job.triggered_by,
            OffsetDateTime::now_utc(),
        );

        let result = self.execute(job, &mut state).await;

        let outcome = if result.is_ok() { "completed" } else { "failed" };
        histogram!(METRIC_REFRESH_JOB_MS, "triggered_by" => job.triggered_by.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_REFRESH_JOB_TOTAL, "outcome" => outcome).increment(1);

        result
    }

    async fn execute(
        &self,
        job: &DocumentRefreshJob,
        state: &mut DocumentRefreshJobState,
    ) -> Result<(), RefreshError> {
        self.advance(job, state, RefreshStatus::Retrieving).await;

        let content = match self.source.fetch(&job.source_name).await {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "Document fetch failed");
                self.fail(job, state, err.to_string()).await;
                return Err(err.into());
            }
        };

        self.advance(job, state, RefreshStatus::Uploading).await;

        let metadata = DocumentMetadata {
            synced_at: OffsetDateTime::now_utc(),
            sha256: content_digest(&content),
            source: job.source_name.clone(),
            triggered_by: job.triggered_by,
        };
        if let Err(err) = self
            .storage
            .upload(&job.container, &job.blob_name, &content, &metadata)
            .await
        {
            error!(error = %err, "Document upload failed");
            self.fail(job, state, err.to_string()).await;
            return Err(err.into());
        }

        self.advance(job, state, RefreshStatus::Completed).await;

        let tag = document_tag(&job.document_id);
        if let Err(err) = self.cache.remove_by_tag(&tag).await {
            warn!(tag = %tag, error = %err, "Failed to invalidate document cache");
        }

        info!(bytes = content.len(), "Document refreshed");
        Ok(())
    }

    async fn advance(
        &self,
        job: &DocumentRefreshJob,
        state: &mut DocumentRefreshJobState,
        status: RefreshStatus,
    ) {
        self.transition(job, state, status, None).await;
    }

    async fn fail(
        &self,
        job: &DocumentRefreshJob,
        state: &mut DocumentRefreshJobState,
        message: String,
    ) {
        let status = RefreshStatus::Failed;
        self.transition(job, state, status, Some(message)).await;
    }

    /// Persist the new state, then broadcast it.
    async fn transition(
        &self,
        job: &DocumentRefreshJob,
        state: &mut DocumentRefreshJobState,
        status: RefreshStatus,
        error_message: Option<String>,
    ) {
        state.transition(status, error_message, OffsetDateTime::now_utc());

        if let Err(err) = self
            .cache
            .set(&job.state_key, &*state, Some(self.state_ttl), &[])
            .await
        {
            warn!(status = %status, error = %err, "Failed to persist refresh state");
        }

        let delivered = self.channels.publish(&job.document_id, state.event());
        info!(status = %status, listeners = delivered, "Refresh status changed");
    }
}

fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::application::documents::{content_key, default_documents};
    use crate::application::refresh::RefreshListener;
    use crate::application::repos::StoredDocument;
    use crate::cache::{MemoryCacheBackend, Tag};
    use crate::domain::documents::RefreshStatusEvent;

    struct StaticSource(Result<String, u16>);

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn fetch(&self, name: &str) -> Result<String, SourceError> {
            self.0.clone().map_err(|status| SourceError::Status {
                name: name.to_string(),
                status,
            })
        }
    }

    #[derive(Default)]
    struct MemoryStorage {
        fail: bool,
        uploads: Mutex<Vec<(String, String, DocumentMetadata)>>,
    }

    #[async_trait]
    impl DocumentStorage for MemoryStorage {
        async fn upload(
            &self,
            container: &str,
            name: &str,
            content: &str,
            metadata: &DocumentMetadata,
        ) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::InvalidPath("disk full".to_string()));
            }
            self.uploads.lock().expect("lock").push((
                format!("{container}/{name}"),
                content.to_string(),
                metadata.clone(),
            ));
            Ok(())
        }

        async fn download(
            &self,
            _container: &str,
            _name: &str,
        ) -> Result<Option<StoredDocument>, StorageError> {
            Ok(None)
        }
    }

    struct Harness {
        refresher: DocumentRefresher,
        cache: CacheStore,
        channels: Arc<RefreshChannelRegistry>,
        storage: Arc<MemoryStorage>,
    }

    fn harness(source: Result<String, u16>, storage: MemoryStorage) -> Harness {
        let cache = CacheStore::new(Arc::new(MemoryCacheBackend::new(32)));
        let channels = Arc::new(RefreshChannelRegistry::default());
        let storage = Arc::new(storage);
        let refresher = DocumentRefresher::new(
            Arc::new(StaticSource(source)),
            storage.clone(),
            cache.clone(),
            channels.clone(),
        );
        Harness {
            refresher,
            cache,
            channels,
            storage,
        }
    }

    fn bylaws() -> WebsiteDocument {
        default_documents()
            .into_iter()
            .find(|document| document.id.as_str() == "bylaws")
            .expect("bylaws")
    }

    fn drain(listener: &mut RefreshListener) -> Vec<RefreshStatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = listener.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn successful_refresh_publishes_in_order_and_invalidates() {
        let h = harness(Ok("<h1>Bylaws</h1>".to_string()), MemoryStorage::default());
        let document = bylaws();
        let mut listener = h.channels.subscribe(&document.id);

        let cached_key = content_key(&document.id);
        h.cache
            .set(&cached_key, "stale", None, &[Tag::new("website:document:bylaws")])
            .await
            .expect("seed cache");

        let job = DocumentRefreshJob::new(&document, TriggeredBy::User);
        h.refresher.run(&job).await.expect("refresh");

        let statuses: Vec<RefreshStatus> =
            drain(&mut listener).into_iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            [
                RefreshStatus::Retrieving,
                RefreshStatus::Uploading,
                RefreshStatus::Completed
            ]
        );

        assert!(h.cache.get::<String>(&cached_key).await.expect("get").is_none());

        let state: DocumentRefreshJobState = h
            .cache
            .get(&job.state_key)
            .await
            .expect("get state")
            .expect("state persisted");
        assert_eq!(state.status, RefreshStatus::Completed);
        assert_eq!(state.job_id, job.job_id);

        let uploads = h.storage.uploads.lock().expect("lock");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "documents/bylaws.html");
        assert_eq!(uploads[0].2.triggered_by, TriggeredBy::User);
        assert_eq!(uploads[0].2.sha256, content_digest("<h1>Bylaws</h1>"));
    }

    #[tokio::test]
    async fn fetch_failure_publishes_retrieving_then_failed() {
        let h = harness(Err(502), MemoryStorage::default());
        let document = bylaws();
        let mut listener = h.channels.subscribe(&document.id);

        let job = DocumentRefreshJob::new(&document, TriggeredBy::Scheduled);
        let err = h.refresher.run(&job).await.unwrap_err();
        assert!(matches!(err, RefreshError::Fetch(_)));

        let events = drain(&mut listener);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, RefreshStatus::Retrieving);
        assert_eq!(events[1].status, RefreshStatus::Failed);
        assert!(
            events[1]
                .error_message
                .as_deref()
                .is_some_and(|message| message.contains("502"))
        );
        assert!(h.storage.uploads.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn upload_failure_is_recorded() {
        let h = harness(
            Ok("<p/>".to_string()),
            MemoryStorage {
                fail: true,
                ..MemoryStorage::default()
            },
        );
        let document = bylaws();
        let job = DocumentRefreshJob::new(&document, TriggeredBy::User);

        let err = h.refresher.run(&job).await.unwrap_err();
        assert!(matches!(err, RefreshError::Upload(_)));

        let state: DocumentRefreshJobState = h
            .cache
            .get(&job.state_key)
            .await
            .expect("get")
            .expect("state");
        assert_eq!(state.status, RefreshStatus::Failed);
        assert!(state.error_message.is_some());
    }

    #[tokio::test]
    async fn refresh_without_listeners_still_persists_state() {
        let h = harness(Ok("<p/>".to_string()), MemoryStorage::default());
        let document = bylaws();
        let job = DocumentRefreshJob::new(&document, TriggeredBy::Scheduled);

        h.refresher.run(&job).await.expect("refresh");

        assert!(!h.channels.has_channel(&document.id));
        let state: Option<DocumentRefreshJobState> =
            h.cache.get(&job.state_key).await.expect("get");
        assert_eq!(state.map(|s| s.status), Some(RefreshStatus::Completed));
    }

    #[test]
    fn jobs_get_unique_ids_and_derived_keys() {
        let document = bylaws();
        let a = DocumentRefreshJob::new(&document, TriggeredBy::User);
        let b = DocumentRefreshJob::new(&document, TriggeredBy::User);
        assert_ne!(a.job_id, b.job_id);
        assert!(Uuid::parse_str(&a.job_id).is_ok());
        assert_eq!(a.state_key.as_str(), "website:doc:bylaws:refresh-state");
    }
}
