//! Image validation, inspection and compression
//!
//! Classifies local files as supported raster images and shrinks oversized
//! ones before upload. Compression never touches the source file; it writes a
//! new temporary file that is removed when its [`TempPath`] is dropped.

pub mod compressor;
pub mod format;
pub mod info;
pub mod mock;

pub use compressor::Compressor;
pub use format::{detect_file_format, detect_format, is_valid_image_format, SupportedFormat};
pub use info::{image_info, ImageInfo};
pub use mock::MockCompressor;

use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tempfile::TempPath;

pub const DEFAULT_MAX_WIDTH: u32 = 1920;
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_QUALITY: u8 = 85;
pub const MIN_QUALITY: u8 = 40;

/// Compression policy for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_bytes: u64,
    pub quality: u8,
}

impl CompressOptions {
    pub fn new(max_width: u32, max_bytes: u64) -> Self {
        Self {
            max_width,
            max_bytes,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Starting JPEG quality, clamped to `MIN_QUALITY..=100`.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(MIN_QUALITY, 100);
        self
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH, DEFAULT_MAX_BYTES)
    }
}

#[derive(Debug)]
pub enum CompressOutcome {
    /// The source already satisfies the policy; keep using it.
    Unchanged,
    /// A new file was written. Dropping `path` deletes it.
    Compressed { path: TempPath, info: ImageInfo },
}

impl CompressOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, CompressOutcome::Compressed { .. })
    }
}

#[async_trait]
pub trait ImageCompressor: Send + Sync {
    async fn compress(&self, path: &Path, options: &CompressOptions) -> Result<CompressOutcome>;
}
