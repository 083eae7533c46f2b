use super::Fetcher;
use crate::image::detect_format;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;

const FALLBACK_EXTENSION: &str = "img";

pub struct HttpFetcher {
    client: Client,
    work_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(work_dir: &Path, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(work_dir, client))
    }

    pub fn new_with_client(work_dir: &Path, client: Client) -> Self {
        Self {
            client,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Pick a file extension from the content signature, then the URL path.
    fn extension_for(url: &Url, bytes: &[u8]) -> String {
        if let Some(format) = detect_format(bytes) {
            return format.extension().to_string();
        }

        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str) -> Result<TempPath> {
        let parsed = Url::parse(url).map_err(|e| Error::DownloadFailed {
            url: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;

        let response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            tracing::error!("Failed to request {}: {}", url, e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP status {}", status),
            });
        }

        let bytes = response.bytes().await?;
        let extension = Self::extension_for(&parsed, &bytes);

        let temp_path = tempfile::Builder::new()
            .prefix("fetch-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(&self.work_dir)?
            .into_temp_path();
        tokio::fs::write(&temp_path, &bytes).await?;

        tracing::debug!(
            "Downloaded {} ({} bytes) to {}",
            url,
            bytes.len(),
            temp_path.display()
        );
        Ok(temp_path)
    }
}
