use crate::{Error, Result};
use image::{ImageFormat, ImageReader};
use std::path::Path;

/// Metadata derived from an image file. Recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

/// Probe format and dimensions from the file header without decoding pixels.
pub fn image_info(path: &Path) -> Result<ImageInfo> {
    let size = std::fs::metadata(path)?.len();

    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;
    let (width, height) = reader.into_dimensions()?;

    Ok(ImageInfo {
        format,
        width,
        height,
        size,
    })
}
