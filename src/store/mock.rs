use super::{MediaStore, RemoteMedia};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedFailure {
    Transient,
    Permanent,
}

/// In-memory store: records every upload and can fail on a script.
#[derive(Clone)]
pub struct MockMediaStore {
    base_url: String,
    upload_count: Arc<Mutex<usize>>,
    uploaded: Arc<Mutex<Vec<(PathBuf, Vec<u8>)>>>,
    failures: Arc<Mutex<VecDeque<ScriptedFailure>>>,
}

impl MockMediaStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://mock-media.example.com".to_string(),
            upload_count: Arc::new(Mutex::new(0)),
            uploaded: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// The next `count` uploads fail with a retryable error.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat(ScriptedFailure::Transient).take(count));
        self
    }

    /// The next upload is rejected outright.
    pub fn with_permanent_failure(self) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push_back(ScriptedFailure::Permanent);
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    /// Paths and contents of successful uploads, in order.
    pub fn get_uploads(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.uploaded.lock().unwrap().clone()
    }
}

impl Default for MockMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for MockMediaStore {
    async fn upload(&self, path: &Path) -> Result<RemoteMedia> {
        *self.upload_count.lock().unwrap() += 1;

        let scripted = self.failures.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedFailure::Transient) => {
                return Err(Error::UploadTransient("Mock network timeout".to_string()))
            }
            Some(ScriptedFailure::Permanent) => {
                return Err(Error::UploadRejected("Mock invalid media".to_string()))
            }
            None => {}
        }

        let data = tokio::fs::read(path).await?;
        self.uploaded
            .lock()
            .unwrap()
            .push((path.to_path_buf(), data));

        let media_id = format!("mock-{}", Uuid::new_v4());
        let url = format!("{}/images/{}", self.base_url, media_id);
        Ok(RemoteMedia { media_id, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_mock_store_upload_records_contents() {
        let store = MockMediaStore::new();
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"image bytes").unwrap();

        let media = store.upload(file.path()).await.unwrap();

        assert!(media.media_id.starts_with("mock-"));
        assert!(media
            .url
            .starts_with("https://mock-media.example.com/images/mock-"));
        assert_eq!(store.get_upload_count(), 1);

        let uploads = store.get_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, b"image bytes");
    }

    #[tokio::test]
    async fn test_mock_store_with_custom_base_url() {
        let store = MockMediaStore::new().with_base_url("https://custom.test".to_string());
        let file = NamedTempFile::new().unwrap();

        let media = store.upload(file.path()).await.unwrap();
        assert!(media.url.starts_with("https://custom.test/images/"));
    }

    #[tokio::test]
    async fn test_mock_store_scripted_failures_run_in_order() {
        let store = MockMediaStore::new()
            .with_transient_failures(1)
            .with_permanent_failure();
        let file = NamedTempFile::new().unwrap();

        let first = store.upload(file.path()).await.unwrap_err();
        assert!(first.is_transient());

        let second = store.upload(file.path()).await.unwrap_err();
        assert!(matches!(second, Error::UploadRejected(_)));

        assert!(store.upload(file.path()).await.is_ok());
        assert_eq!(store.get_upload_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_store_missing_file() {
        let store = MockMediaStore::new();
        let result = store.upload(Path::new("/definitely/missing.png")).await;

        assert!(result.is_err());
        assert!(store.get_uploads().is_empty());
    }
}
