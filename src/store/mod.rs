//! Remote media store integration
//!
//! Pushes local image files to a content store and returns the media
//! identifier and public URL it assigns. Transport failures are classified as
//! transient or permanent; [`upload_with_retry`] only repeats the former.

pub mod http;
pub mod mock;
pub mod s3;

pub use http::HttpMediaStore;
pub use mock::MockMediaStore;
pub use s3::S3MediaStore;

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::{strategy::FixedInterval, RetryIf};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// What the store hands back for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMedia {
    pub media_id: String,
    pub url: String,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// One complete upload attempt. No resumable state is kept between calls.
    async fn upload(&self, path: &Path) -> Result<RemoteMedia>;
}

/// How many times to try an upload and which failures deserve another try.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub classifier: fn(&Error) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            classifier: Error::is_transient,
        }
    }

    pub fn with_classifier(mut self, classifier: fn(&Error) -> bool) -> Self {
        self.classifier = classifier;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Upload `path`, retrying transient failures sequentially.
///
/// Any failure comes back as [`Error::UploadFailed`] carrying the number of
/// attempts actually made. A `max_attempts` of zero still makes one attempt.
pub async fn upload_with_retry(
    store: &dyn MediaStore,
    path: &Path,
    policy: &RetryPolicy,
) -> Result<RemoteMedia> {
    let max_attempts = policy.max_attempts.max(1);
    let attempts = AtomicU32::new(0);
    let retry_strategy =
        FixedInterval::new(policy.interval).take(max_attempts.saturating_sub(1) as usize);

    let result = RetryIf::spawn(
        retry_strategy,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                "Uploading {} (attempt {}/{})",
                path.display(),
                attempt,
                max_attempts
            );
            store.upload(path)
        },
        |e: &Error| {
            let transient = (policy.classifier)(e);
            let attempt = attempts.load(Ordering::SeqCst);
            if transient && attempt < max_attempts {
                tracing::warn!(
                    "Upload attempt {}/{} failed: {}. Will retry...",
                    attempt,
                    max_attempts,
                    e
                );
            } else if !transient {
                tracing::warn!("Upload rejected permanently, not retrying: {}", e);
            }
            transient
        },
    )
    .await;

    result.map_err(|e| {
        let attempts = attempts.load(Ordering::SeqCst);
        tracing::error!(
            "Failed to upload {} after {} attempt(s): {}",
            path.display(),
            attempts,
            e
        );
        Error::UploadFailed {
            attempts,
            source: Box::new(e),
        }
    })
}
