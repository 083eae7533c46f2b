use super::{CompressOptions, CompressOutcome, ImageCompressor, ImageInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Unchanged,
    Copy,
    Fail,
}

/// Test double that either leaves images alone, copies them to a temp file
/// in `work_dir`, or fails.
#[derive(Clone)]
pub struct MockCompressor {
    compress_count: Arc<Mutex<usize>>,
    behavior: MockBehavior,
    work_dir: PathBuf,
}

impl MockCompressor {
    pub fn new() -> Self {
        Self {
            compress_count: Arc::new(Mutex::new(0)),
            behavior: MockBehavior::Unchanged,
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_work_dir(mut self, path: &Path) -> Self {
        self.work_dir = path.to_path_buf();
        self
    }

    /// Produce a temp copy of every input, as if compression happened.
    pub fn with_copy(mut self) -> Self {
        self.behavior = MockBehavior::Copy;
        self
    }

    pub fn with_failure(mut self, should_fail: bool) -> Self {
        if should_fail {
            self.behavior = MockBehavior::Fail;
        }
        self
    }

    pub fn get_compress_count(&self) -> usize {
        *self.compress_count.lock().unwrap()
    }
}

impl Default for MockCompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageCompressor for MockCompressor {
    async fn compress(&self, path: &Path, options: &CompressOptions) -> Result<CompressOutcome> {
        *self.compress_count.lock().unwrap() += 1;

        match self.behavior {
            MockBehavior::Unchanged => Ok(CompressOutcome::Unchanged),
            MockBehavior::Fail => Err(Error::CompressFailed(format!(
                "Mock failure for {}",
                path.display()
            ))),
            MockBehavior::Copy => {
                let copy = tempfile::Builder::new()
                    .prefix("mock-compressed-")
                    .tempfile_in(&self.work_dir)?
                    .into_temp_path();
                let size = std::fs::copy(path, &copy)?;
                Ok(CompressOutcome::Compressed {
                    path: copy,
                    info: ImageInfo {
                        format: image::ImageFormat::Jpeg,
                        width: options.max_width,
                        height: options.max_width / 2,
                        size,
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mock_compressor_unchanged_by_default() {
        let compressor = MockCompressor::new();

        let outcome = compressor
            .compress(Path::new("/nowhere.png"), &CompressOptions::default())
            .await
            .unwrap();

        assert!(!outcome.changed());
        assert_eq!(compressor.get_compress_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_compressor_copy_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        let work = TempDir::new().unwrap();

        let compressor = MockCompressor::new().with_work_dir(work.path()).with_copy();
        let outcome = compressor
            .compress(&source, &CompressOptions::default())
            .await
            .unwrap();

        let CompressOutcome::Compressed { path, info } = outcome else {
            panic!("expected a copy");
        };
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");
        assert_eq!(info.size, 10);

        drop(path);
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_mock_compressor_failure() {
        let compressor = MockCompressor::new().with_failure(true);

        let result = compressor
            .compress(Path::new("/nowhere.png"), &CompressOptions::default())
            .await;
        assert!(matches!(result, Err(Error::CompressFailed(_))));
    }
}
