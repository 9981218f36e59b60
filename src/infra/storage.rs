//! Filesystem-backed object storage for published documents.
//!
//! Objects live at `<root>/<container>/<name>` with a JSON metadata sidecar at
//! `<name>.meta.json`. Both files are written to a temporary sibling first and
//! renamed into place, so readers never observe a partial write.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{
    DocumentMetadata, DocumentStorage, StorageError, StoredDocument,
};

const METADATA_SUFFIX: &str = ".meta.json";

#[derive(Debug)]
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, container: &str, name: &str) -> Result<PathBuf, StorageError> {
        let container = relative_segment(container)?;
        let name = relative_segment(name)?;
        Ok(self.root.join(container).join(name))
    }
}

fn relative_segment(raw: &str) -> Result<&Path, StorageError> {
    let path = Path::new(raw);
    let valid = !raw.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(StorageError::InvalidPath(raw.to_string()))
    }
}

fn metadata_path(object: &Path) -> PathBuf {
    let mut raw = object.as_os_str().to_owned();
    raw.push(METADATA_SUFFIX);
    PathBuf::from(raw)
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp = target.as_os_str().to_owned();
    temp.push(format!(".{}.tmp", Uuid::new_v4()));
    let temp = PathBuf::from(temp);

    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&temp, target).await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(StorageError::Io(err));
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::Io(err)),
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError> {
        let object = self.resolve(container, name)?;
        let sidecar = serde_json::to_vec_pretty(metadata)
            .map_err(|err| StorageError::Metadata(err.to_string()))?;

        // Content first: a sidecar never describes bytes that are not on disk.
        write_atomic(&object, content.as_bytes()).await?;
        write_atomic(&metadata_path(&object), &sidecar).await?;

        debug!(
            container,
            name,
            bytes = content.len(),
            sha256 = %metadata.sha256,
            "Stored document"
        );
        Ok(())
    }

    async fn download(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<StoredDocument>, StorageError> {
        let object = self.resolve(container, name)?;
        let Some(content) = read_optional(&object).await? else {
            return Ok(None);
        };
        let content = String::from_utf8(content)
            .map_err(|err| StorageError::Metadata(format!("content is not utf-8: {err}")))?;

        let sidecar = read_optional(&metadata_path(&object))
            .await?
            .ok_or_else(|| StorageError::Metadata(format!("missing metadata for {container}/{name}")))?;
        let metadata: DocumentMetadata = serde_json::from_slice(&sidecar)
            .map_err(|err| StorageError::Metadata(err.to_string()))?;

        Ok(Some(StoredDocument { content, metadata }))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::documents::TriggeredBy;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            synced_at: datetime!(2026-03-01 03:00 UTC),
            sha256: "abc123".to_string(),
            source: "Bylaws".to_string(),
            triggered_by: TriggeredBy::Scheduled,
        }
    }

    #[tokio::test]
    async fn upload_then_download_returns_content_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FsDocumentStorage::new(dir.path().join("objects")).expect("storage");

        storage
            .upload("documents", "bylaws.html", "<h1>Bylaws</h1>", &metadata())
            .await
            .expect("upload");

        let stored = storage
            .download("documents", "bylaws.html")
            .await
            .expect("download")
            .expect("present");
        assert_eq!(stored.content, "<h1>Bylaws</h1>");
        assert_eq!(stored.metadata, metadata());
        assert!(dir.path().join("objects/documents/bylaws.html.meta.json").exists());
    }

    #[tokio::test]
    async fn upload_overwrites_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FsDocumentStorage::new(dir.path().to_path_buf()).expect("storage");

        storage
            .upload("documents", "bylaws.html", "old", &metadata())
            .await
            .expect("first upload");
        storage
            .upload("documents", "bylaws.html", "new", &metadata())
            .await
            .expect("second upload");

        let stored = storage
            .download("documents", "bylaws.html")
            .await
            .expect("download")
            .expect("present");
        assert_eq!(stored.content, "new");

        let leftovers = std::fs::read_dir(dir.path().join("documents"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_object_downloads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FsDocumentStorage::new(dir.path().to_path_buf()).expect("storage");

        let stored = storage
            .download("documents", "never-uploaded.html")
            .await
            .expect("download");
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn object_without_sidecar_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FsDocumentStorage::new(dir.path().to_path_buf()).expect("storage");
        std::fs::create_dir_all(dir.path().join("documents")).expect("mkdir");
        std::fs::write(dir.path().join("documents/orphan.html"), "x").expect("write");

        let err = storage
            .download("documents", "orphan.html")
            .await
            .expect_err("missing sidecar");
        assert!(matches!(err, StorageError::Metadata(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FsDocumentStorage::new(dir.path().to_path_buf()).expect("storage");

        for (container, name) in [
            ("documents", "../escape.html"),
            ("..", "bylaws.html"),
            ("/etc", "passwd"),
            ("documents", ""),
        ] {
            let err = storage
                .upload(container, name, "x", &metadata())
                .await
                .expect_err("invalid path");
            assert!(matches!(err, StorageError::InvalidPath(_)), "{container}/{name}");
        }
    }
}
