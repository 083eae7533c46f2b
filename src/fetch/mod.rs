//! Remote image retrieval
//!
//! Downloads a URL into a uniquely named temporary file. The returned
//! [`TempPath`] owns the file; dropping it removes the download.

pub mod client;
pub mod mock;

pub use client::HttpFetcher;
pub use mock::MockFetcher;

use crate::Result;
use async_trait::async_trait;
use tempfile::TempPath;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Content is not inspected; validation happens after download.
    async fn download(&self, url: &str) -> Result<TempPath>;
}
