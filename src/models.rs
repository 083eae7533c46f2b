//! Data models and configuration
//!
//! Defines image references, the caller-facing upload result, and the
//! environment-driven configuration consumed by the ingestion pipeline.

use crate::image::{DEFAULT_MAX_BYTES, DEFAULT_MAX_WIDTH, DEFAULT_QUALITY, MIN_QUALITY};
use crate::store::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where an image referenced from a document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ImageReference {
    Local(PathBuf),
    Remote(String),
}

impl ImageReference {
    /// `http://` and `https://` (any case) are remote, everything else is a path.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageReference::Remote(trimmed.to_string())
        } else {
            ImageReference::Local(PathBuf::from(trimmed))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageReference::Remote(_))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Local(path) => write!(f, "{}", path.display()),
            ImageReference::Remote(url) => f.write_str(url),
        }
    }
}

/// Returned to the document-rewriting step for each uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub media_id: String,
    pub remote_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Non-fatal problems hit along the way, such as a skipped compression.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    S3,
    Http,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StoreBackend::S3),
            "http" => Ok(StoreBackend::Http),
            other => Err(Error::Config(format!(
                "MEDIA_STORE must be 's3' or 'http', got '{}'",
                other
            ))),
        }
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub compress_images: bool,
    pub max_image_width: u32,
    pub max_image_size: u64,
    pub compress_quality: u8,
    pub upload_max_attempts: u32,
    pub upload_retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub work_dir: PathBuf,
    pub store: StoreBackend,
    pub dry_run: bool,
    pub cdn_access_key_id: Option<String>,
    pub cdn_secret_access_key: Option<String>,
    pub cdn_endpoint: String,
    pub cdn_bucket: String,
    pub cdn_base_url: String,
    pub media_base_url: String,
    pub media_access_token: Option<String>,
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn tolerate_missing_env_file<T>(loaded: dotenvy::Result<T>) -> Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        tolerate_missing_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            compress_images: var("COMPRESS_IMAGES")
                .map(|v| parse_bool("COMPRESS_IMAGES", &v))
                .transpose()?
                .unwrap_or(true),
            max_image_width: var("MAX_IMAGE_WIDTH")
                .map(|v| parse_number("MAX_IMAGE_WIDTH", &v))
                .transpose()?
                .unwrap_or(DEFAULT_MAX_WIDTH),
            max_image_size: var("MAX_IMAGE_SIZE")
                .map(|v| parse_number("MAX_IMAGE_SIZE", &v))
                .transpose()?
                .unwrap_or(DEFAULT_MAX_BYTES),
            compress_quality: var("COMPRESS_QUALITY")
                .map(|v| parse_number("COMPRESS_QUALITY", &v))
                .transpose()?
                .unwrap_or(DEFAULT_QUALITY),
            upload_max_attempts: var("UPLOAD_MAX_ATTEMPTS")
                .map(|v| parse_number("UPLOAD_MAX_ATTEMPTS", &v))
                .transpose()?
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            upload_retry_delay: var("UPLOAD_RETRY_DELAY_MS")
                .map(|v| parse_number("UPLOAD_RETRY_DELAY_MS", &v).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(DEFAULT_RETRY_INTERVAL),
            fetch_timeout: var("FETCH_TIMEOUT_SECS")
                .map(|v| parse_number("FETCH_TIMEOUT_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(Duration::from_secs(30)),
            work_dir: var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            store: var("MEDIA_STORE")
                .map(|v| v.parse::<StoreBackend>())
                .transpose()?
                .unwrap_or(StoreBackend::S3),
            dry_run: var("DRY_RUN")
                .map(|v| parse_bool("DRY_RUN", &v))
                .transpose()?
                .unwrap_or(false),
            cdn_access_key_id: var("CDN_ACCESS_KEY_ID"),
            cdn_secret_access_key: var("CDN_SECRET_ACCESS_KEY"),
            cdn_endpoint: var("CDN_ENDPOINT")
                .unwrap_or_else(|| "https://nyc3.digitaloceanspaces.com".to_string()),
            cdn_bucket: var("CDN_BUCKET").unwrap_or_else(|| "media".to_string()),
            cdn_base_url: var("CDN_BASE_URL")
                .unwrap_or_else(|| "https://cdn.example.com".to_string()),
            media_base_url: var("MEDIA_BASE_URL")
                .unwrap_or_else(|| "https://api.weixin.qq.com".to_string()),
            media_access_token: var("MEDIA_ACCESS_TOKEN"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_image_width == 0 {
            return Err(Error::Config("MAX_IMAGE_WIDTH must be positive".to_string()));
        }
        if !(MIN_QUALITY..=100).contains(&self.compress_quality) {
            return Err(Error::Config(format!(
                "COMPRESS_QUALITY must be between {} and 100, got {}",
                MIN_QUALITY, self.compress_quality
            )));
        }
        if self.dry_run {
            return Ok(());
        }
        match self.store {
            StoreBackend::S3 => {
                if self.cdn_access_key_id.is_none() {
                    return Err(Error::Config("CDN_ACCESS_KEY_ID not set".to_string()));
                }
                if self.cdn_secret_access_key.is_none() {
                    return Err(Error::Config("CDN_SECRET_ACCESS_KEY not set".to_string()));
                }
            }
            StoreBackend::Http => {
                if self.media_access_token.is_none() {
                    return Err(Error::Config("MEDIA_ACCESS_TOKEN not set".to_string()));
                }
            }
        }
        Ok(())
    }
}
