//! Error handling and custom error types
//!
//! Provides unified error handling across the ingestion pipeline using thiserror.
//! Upload errors are split into transient and permanent kinds so the retry
//! policy can decide whether another attempt is worthwhile.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("downloaded file is not a valid image: {0}")]
    InvalidImage(String),

    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("upload rejected: {0}")]
    UploadRejected(String),

    #[error("transient upload error: {0}")]
    UploadTransient(String),

    #[error("upload failed after {attempts} attempt(s): {source}")]
    UploadFailed {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("ingestion did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether another upload attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::UploadTransient(_) => true,
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::UploadTransient("busy".to_string()).is_transient());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_transient());

        assert!(!Error::UploadRejected("too large".to_string()).is_transient());
        assert!(!Error::NotFound("a.png".to_string()).is_transient());
        assert!(!Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_transient());
    }

    #[test]
    fn test_upload_failed_reports_attempts() {
        let err = Error::UploadFailed {
            attempts: 3,
            source: Box::new(Error::UploadTransient("timeout".to_string())),
        };
        let message = err.to_string();
        assert!(message.contains("3 attempt(s)"));
        assert!(message.contains("timeout"));
    }
}
