use super::{
    image_info, CompressOptions, CompressOutcome, ImageCompressor, ImageInfo, SupportedFormat,
    MIN_QUALITY,
};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const QUALITY_STEP: u8 = 10;

/// What the policy wants done to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    resize_to: Option<(u32, u32)>,
    too_large: bool,
    convert: bool,
}

impl Plan {
    fn for_image(info: &ImageInfo, options: &CompressOptions) -> Self {
        let resize_to = (info.width > options.max_width).then(|| {
            let ratio = f64::from(options.max_width) / f64::from(info.width);
            let height = (f64::from(info.height) * ratio).round() as u32;
            (options.max_width, height.max(1))
        });

        Self {
            resize_to,
            too_large: info.size > options.max_bytes,
            convert: SupportedFormat::from_image_format(info.format).is_none(),
        }
    }

    fn is_noop(&self) -> bool {
        self.resize_to.is_none() && !self.too_large && !self.convert
    }
}

/// JPEG has no alpha channel, so transparent pixels are blended onto white.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Downscales wide images and re-encodes oversized ones into `work_dir`.
pub struct Compressor {
    work_dir: PathBuf,
}

impl Compressor {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }

    fn encode(image: &DynamicImage, format: SupportedFormat, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match format {
            SupportedFormat::Jpeg => {
                let rgb = flatten_onto_white(image);
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
                encoder.encode(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )?;
            }
            SupportedFormat::Png => {
                image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            }
            SupportedFormat::Gif => {
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)?;
            }
        }
        Ok(buf)
    }

    /// Step JPEG quality down until the output fits or the floor is hit.
    fn reduce_quality(
        image: &DynamicImage,
        options: &CompressOptions,
    ) -> Result<(SupportedFormat, Vec<u8>)> {
        let mut quality = options.quality;
        loop {
            let bytes = Self::encode(image, SupportedFormat::Jpeg, quality)?;
            let fits = bytes.len() as u64 <= options.max_bytes;
            if fits || quality <= MIN_QUALITY {
                if !fits {
                    tracing::warn!(
                        "Image still {} bytes at quality floor {} (limit {}), keeping best effort",
                        bytes.len(),
                        quality,
                        options.max_bytes
                    );
                }
                tracing::debug!("Re-encoded as JPEG at quality {}", quality);
                return Ok((SupportedFormat::Jpeg, bytes));
            }
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        }
    }

    /// Header read, planning, decoding and encoding all run here, off the
    /// async runtime.
    fn compress_sync(
        path: PathBuf,
        options: CompressOptions,
        work_dir: PathBuf,
    ) -> Result<CompressOutcome> {
        let info = image_info(&path)?;
        let plan = Plan::for_image(&info, &options);
        if plan.is_noop() {
            tracing::debug!(
                "{} ({}x{}, {} bytes) needs no compression",
                path.display(),
                info.width,
                info.height,
                info.size
            );
            return Ok(CompressOutcome::Unchanged);
        }

        let mut image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
        if let Some((width, height)) = plan.resize_to {
            tracing::info!(
                "Resizing {} from {}x{} to {}x{}",
                path.display(),
                info.width,
                info.height,
                width,
                height
            );
            image = image.resize_exact(width, height, FilterType::Lanczos3);
        }

        let source = SupportedFormat::from_image_format(info.format);
        let reencoded = match source {
            Some(format) if plan.resize_to.is_some() => {
                Some((format, Self::encode(&image, format, options.quality)?))
            }
            Some(_) => None,
            None => Some((
                SupportedFormat::Jpeg,
                Self::encode(&image, SupportedFormat::Jpeg, options.quality)?,
            )),
        };

        let current_size = reencoded
            .as_ref()
            .map_or(info.size, |(_, bytes)| bytes.len() as u64);
        let (format, bytes) = match reencoded {
            Some(output) if current_size <= options.max_bytes => output,
            _ => Self::reduce_quality(&image, &options)?,
        };

        let mut file = tempfile::Builder::new()
            .prefix("compressed-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile_in(&work_dir)?;
        file.write_all(&bytes)?;
        file.flush()?;

        let output_info = ImageInfo {
            format: format.image_format(),
            width: image.width(),
            height: image.height(),
            size: bytes.len() as u64,
        };
        Ok(CompressOutcome::Compressed {
            path: file.into_temp_path(),
            info: output_info,
        })
    }

    async fn compress_inner(
        &self,
        path: &Path,
        options: &CompressOptions,
    ) -> Result<CompressOutcome> {
        tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            let options = *options;
            let work_dir = self.work_dir.clone();
            move || Self::compress_sync(path, options, work_dir)
        })
        .await
        .map_err(|e| Error::CompressFailed(format!("compression task join error: {}", e)))?
    }
}

#[async_trait]
impl ImageCompressor for Compressor {
    async fn compress(&self, path: &Path, options: &CompressOptions) -> Result<CompressOutcome> {
        self.compress_inner(path, options)
            .await
            .map_err(|e| match e {
                Error::CompressFailed(_) => e,
                other => Error::CompressFailed(format!("{}: {}", path.display(), other)),
            })
    }
}
