use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Longest signature we match against.
const SIGNATURE_LEN: usize = 8;

/// Raster formats the remote store accepts as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Jpeg,
    Png,
    Gif,
}

impl SupportedFormat {
    pub fn mime(self) -> &'static str {
        match self {
            SupportedFormat::Jpeg => "image/jpeg",
            SupportedFormat::Png => "image/png",
            SupportedFormat::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SupportedFormat::Jpeg => "jpg",
            SupportedFormat::Png => "png",
            SupportedFormat::Gif => "gif",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            SupportedFormat::Jpeg => image::ImageFormat::Jpeg,
            SupportedFormat::Png => image::ImageFormat::Png,
            SupportedFormat::Gif => image::ImageFormat::Gif,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(SupportedFormat::Jpeg),
            image::ImageFormat::Png => Some(SupportedFormat::Png),
            image::ImageFormat::Gif => Some(SupportedFormat::Gif),
            _ => None,
        }
    }
}

pub fn detect_format(bytes: &[u8]) -> Option<SupportedFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(SupportedFormat::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(SupportedFormat::Png),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(SupportedFormat::Gif),
        _ => None,
    }
}

/// Reads the leading bytes of `path` and classifies them.
///
/// Missing, unreadable or truncated files yield `None`.
pub fn detect_file_format(path: &Path) -> Option<SupportedFormat> {
    let mut file = File::open(path).ok()?;
    let mut header = [0u8; SIGNATURE_LEN];
    let mut filled = 0;
    while filled < SIGNATURE_LEN {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Failed to read header of {}: {}", path.display(), e);
                return None;
            }
        }
    }
    detect_format(&header[..filled])
}

/// True when `path` holds a JPEG, PNG or GIF. Never errors.
pub fn is_valid_image_format(path: &Path) -> bool {
    detect_file_format(path).is_some()
}
