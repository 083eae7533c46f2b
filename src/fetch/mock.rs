use super::Fetcher;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempPath;

/// Serves canned bytes for every URL and remembers the files it created.
#[derive(Clone)]
pub struct MockFetcher {
    body: Vec<u8>,
    should_fail: bool,
    work_dir: PathBuf,
    created: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            body: Vec::new(),
            should_fail: false,
            work_dir: std::env::temp_dir(),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_work_dir(mut self, path: &Path) -> Self {
        self.work_dir = path.to_path_buf();
        self
    }

    pub fn with_failure(mut self, should_fail: bool) -> Self {
        self.should_fail = should_fail;
        self
    }

    pub fn get_created_paths(&self) -> Vec<PathBuf> {
        self.created.lock().unwrap().clone()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn download(&self, url: &str) -> Result<TempPath> {
        if self.should_fail {
            return Err(Error::Io(std::io::Error::other(format!(
                "Mock network failure for {}",
                url
            ))));
        }

        let temp_path = tempfile::Builder::new()
            .prefix("mock-fetch-")
            .tempfile_in(&self.work_dir)?
            .into_temp_path();
        std::fs::write(&temp_path, &self.body)?;
        self.created.lock().unwrap().push(temp_path.to_path_buf());
        Ok(temp_path)
    }
}
