//! Ingestion orchestration: acquire, validate, compress, upload.

use crate::batch::{BatchReport, FailedImage, ImageBatch};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::image::{
    image_info, is_valid_image_format, CompressOptions, CompressOutcome, Compressor,
    ImageCompressor, ImageInfo,
};
use crate::models::{Config, ImageReference, StoreBackend, UploadResult};
use crate::store::{
    upload_with_retry, HttpMediaStore, MediaStore, MockMediaStore, RetryPolicy, S3MediaStore,
};
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Steps of a single ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Start,
    Acquired,
    Validated,
    Compressed,
    CompressSkipped,
    Uploaded,
    Done,
    Failed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Start => "start",
            IngestStage::Acquired => "acquired",
            IngestStage::Validated => "validated",
            IngestStage::Compressed => "compressed",
            IngestStage::CompressSkipped => "compress-skipped",
            IngestStage::Uploaded => "uploaded",
            IngestStage::Done => "done",
            IngestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct StageLog<'a> {
    source: &'a str,
    stage: IngestStage,
}

impl<'a> StageLog<'a> {
    fn new(source: &'a str) -> Self {
        debug!("[{}] ingestion {}", source, IngestStage::Start);
        Self {
            source,
            stage: IngestStage::Start,
        }
    }

    fn advance(&mut self, next: IngestStage) {
        debug!("[{}] {} -> {}", self.source, self.stage, next);
        self.stage = next;
    }

    fn finish(mut self, result: &Result<UploadResult>) {
        match result {
            Ok(_) => self.advance(IngestStage::Done),
            Err(e) => {
                warn!("[{}] ingestion failed at {}: {}", self.source, self.stage, e);
                self.advance(IngestStage::Failed);
            }
        }
    }
}

/// Run a short filesystem read on the blocking pool.
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task)
        .await
        .map_err(std::io::Error::from)?)
}

/// Per-processor pipeline settings. Immutable once the processor is built.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub compress_images: bool,
    pub compress: CompressOptions,
    pub retry: RetryPolicy,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            compress_images: config.compress_images,
            compress: CompressOptions::new(config.max_image_width, config.max_image_size)
                .with_quality(config.compress_quality),
            retry: RetryPolicy::new(config.upload_max_attempts, config.upload_retry_delay),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            compress_images: true,
            compress: CompressOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Injectable service bundle used to construct [`Processor`] in tests/harnesses.
pub struct ProcessorServices {
    pub store: Box<dyn MediaStore>,
    pub fetcher: Box<dyn Fetcher>,
    pub compressor: Box<dyn ImageCompressor>,
}

/// Turns image references into uploaded media.
///
/// Calls are independent: the processor holds no per-call state, so one
/// instance can serve many concurrent ingestions.
pub struct Processor {
    store: Box<dyn MediaStore>,
    fetcher: Box<dyn Fetcher>,
    compressor: Box<dyn ImageCompressor>,
    settings: IngestSettings,
}

impl Processor {
    pub fn with_services(services: ProcessorServices, settings: IngestSettings) -> Self {
        Self {
            store: services.store,
            fetcher: services.fetcher,
            compressor: services.compressor,
            settings,
        }
    }

    /// Construct a processor with real stores from configuration.
    pub async fn new(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;

        let store: Box<dyn MediaStore> = if config.dry_run {
            info!("DRY_RUN enabled, uploads go to an in-memory store");
            Box::new(MockMediaStore::new().with_base_url(config.cdn_base_url.clone()))
        } else {
            match config.store {
                StoreBackend::S3 => {
                    let access_key_id = config
                        .cdn_access_key_id
                        .clone()
                        .ok_or_else(|| Error::Config("CDN_ACCESS_KEY_ID not set".to_string()))?;
                    let secret_access_key =
                        config.cdn_secret_access_key.clone().ok_or_else(|| {
                            Error::Config("CDN_SECRET_ACCESS_KEY not set".to_string())
                        })?;
                    info!("Media store: S3 bucket {}", config.cdn_bucket);
                    Box::new(
                        S3MediaStore::new(
                            access_key_id,
                            secret_access_key,
                            config.cdn_endpoint.clone(),
                            config.cdn_bucket.clone(),
                            config.cdn_base_url.clone(),
                        )
                        .await?,
                    )
                }
                StoreBackend::Http => {
                    let token = config
                        .media_access_token
                        .clone()
                        .ok_or_else(|| Error::Config("MEDIA_ACCESS_TOKEN not set".to_string()))?;
                    info!("Media store: HTTP endpoint {}", config.media_base_url);
                    Box::new(HttpMediaStore::new(
                        config.media_base_url.clone(),
                        token,
                        Duration::from_secs(60),
                    )?)
                }
            }
        };

        let fetcher = Box::new(HttpFetcher::new(&config.work_dir, config.fetch_timeout)?);
        let compressor = Box::new(Compressor::new(&config.work_dir));

        Ok(Self::with_services(
            ProcessorServices {
                store,
                fetcher,
                compressor,
            },
            IngestSettings::from_config(config),
        ))
    }

    /// Use `quality` as the starting JPEG quality for later calls.
    pub fn with_compress_quality(mut self, quality: u8) -> Self {
        self.settings.compress = self.settings.compress.with_quality(quality);
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn image_info(&self, path: &Path) -> Result<ImageInfo> {
        image_info(path)
    }

    /// Run the compressor alone with this processor's options.
    pub async fn compress_image(&self, path: &Path) -> Result<CompressOutcome> {
        self.compressor.compress(path, &self.settings.compress).await
    }

    pub async fn ingest(&self, reference: &ImageReference) -> Result<UploadResult> {
        match reference {
            ImageReference::Local(path) => self.upload_local(path).await,
            ImageReference::Remote(url) => self.download_and_upload(url).await,
        }
    }

    /// [`Processor::ingest`] bounded by a deadline. Temporary files are still
    /// released when the deadline cuts the call short.
    pub async fn ingest_within(
        &self,
        reference: &ImageReference,
        deadline: Duration,
    ) -> Result<UploadResult> {
        tokio::time::timeout(deadline, self.ingest(reference))
            .await
            .map_err(|_| Error::DeadlineExceeded(deadline))?
    }

    pub async fn upload_local(&self, path: &Path) -> Result<UploadResult> {
        info!("Uploading local image: {}", path.display());
        let source = path.display().to_string();
        let mut stages = StageLog::new(&source);

        let result = self.upload_local_inner(path, &mut stages).await;
        stages.finish(&result);
        result
    }

    async fn upload_local_inner(
        &self,
        path: &Path,
        stages: &mut StageLog<'_>,
    ) -> Result<UploadResult> {
        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        stages.advance(IngestStage::Acquired);

        let candidate = path.to_path_buf();
        if !blocking(move || is_valid_image_format(&candidate)).await? {
            return Err(Error::UnsupportedFormat(path.display().to_string()));
        }
        stages.advance(IngestStage::Validated);

        self.compress_and_upload(path, stages).await
    }

    pub async fn download_and_upload(&self, url: &str) -> Result<UploadResult> {
        info!("Downloading and uploading image: {}", url);
        let mut stages = StageLog::new(url);

        let result = self.download_and_upload_inner(url, &mut stages).await;
        stages.finish(&result);
        result
    }

    async fn download_and_upload_inner(
        &self,
        url: &str,
        stages: &mut StageLog<'_>,
    ) -> Result<UploadResult> {
        let downloaded: TempPath = self.fetcher.download(url).await.map_err(|e| match e {
            Error::DownloadFailed { .. } => e,
            other => Error::DownloadFailed {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        stages.advance(IngestStage::Acquired);

        let candidate = downloaded.to_path_buf();
        if !blocking(move || is_valid_image_format(&candidate)).await? {
            return Err(Error::InvalidImage(url.to_string()));
        }
        stages.advance(IngestStage::Validated);

        self.compress_and_upload(&downloaded, stages).await
    }

    /// Shared tail of both entry points. Any compressed artifact lives only
    /// for the duration of this call.
    async fn compress_and_upload(
        &self,
        source: &Path,
        stages: &mut StageLog<'_>,
    ) -> Result<UploadResult> {
        let mut warnings = Vec::new();
        let mut compressed: Option<TempPath> = None;
        let mut dimensions = None;

        if self.settings.compress_images {
            match self.compressor.compress(source, &self.settings.compress).await {
                Ok(CompressOutcome::Compressed { path, info }) => {
                    info!("Using compressed image: {}", path.display());
                    dimensions = Some((info.width, info.height));
                    compressed = Some(path);
                    stages.advance(IngestStage::Compressed);
                }
                Ok(CompressOutcome::Unchanged) => stages.advance(IngestStage::CompressSkipped),
                Err(e) => {
                    warn!("Compress failed, using original: {}", e);
                    warnings.push(format!("compression skipped, original uploaded: {}", e));
                    stages.advance(IngestStage::CompressSkipped);
                }
            }
        } else {
            stages.advance(IngestStage::CompressSkipped);
        }

        let dimensions = match dimensions {
            Some(dimensions) => Some(dimensions),
            None => {
                let original = source.to_path_buf();
                match blocking(move || image_info(&original)).await? {
                    Ok(info) => Some((info.width, info.height)),
                    Err(e) => {
                        debug!("Could not read dimensions of {}: {}", source.display(), e);
                        None
                    }
                }
            }
        };

        let upload_path = compressed.as_deref().unwrap_or(source);
        let media = upload_with_retry(self.store.as_ref(), upload_path, &self.settings.retry).await?;
        stages.advance(IngestStage::Uploaded);

        info!("Uploaded image as media {}", media.media_id);
        Ok(UploadResult {
            media_id: media.media_id,
            remote_url: media.url,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            warnings,
        })
    }

    /// Ingest every image of a document in order. Failures are recorded and
    /// skipped; they never stop the remaining images.
    pub async fn process_batch(&self, batch: &ImageBatch) -> BatchReport {
        let mut report = BatchReport::default();

        for entry in batch.entries() {
            match self.ingest(&entry.reference).await {
                Ok(result) => {
                    report.uploaded.insert(entry.ordinal, result);
                }
                Err(e) => {
                    warn!(
                        "[IMG:{}] Skipping {}: {}",
                        entry.ordinal, entry.reference, e
                    );
                    report.failed.push(FailedImage {
                        ordinal: entry.ordinal,
                        reference: entry.reference.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch finished: {} uploaded, {} failed",
            report.uploaded.len(),
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use crate::image::MockCompressor;
    use crate::store::RemoteMedia;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct Harness {
        processor: Processor,
        store: MockMediaStore,
        fetcher: MockFetcher,
        work_dir: TempDir,
        input_dir: TempDir,
    }

    fn fast_settings() -> IngestSettings {
        IngestSettings {
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..IngestSettings::default()
        }
    }

    fn build_harness(
        store: MockMediaStore,
        fetcher: MockFetcher,
        compressor: Option<MockCompressor>,
        settings: IngestSettings,
    ) -> Harness {
        let work_dir = TempDir::new().unwrap();
        let input_dir = TempDir::new().unwrap();
        let fetcher = fetcher.with_work_dir(work_dir.path());

        let compressor: Box<dyn ImageCompressor> = match compressor {
            Some(mock) => Box::new(mock.with_work_dir(work_dir.path())),
            None => Box::new(Compressor::new(work_dir.path())),
        };

        let processor = Processor::with_services(
            ProcessorServices {
                store: Box::new(store.clone()),
                fetcher: Box::new(fetcher.clone()),
                compressor,
            },
            settings,
        );

        Harness {
            processor,
            store,
            fetcher,
            work_dir,
            input_dir,
        }
    }

    impl Harness {
        fn write_png(&self, name: &str, width: u32, height: u32) -> PathBuf {
            let path = self.input_dir.path().join(name);
            RgbImage::from_pixel(width, height, Rgb([0, 128, 255]))
                .save(&path)
                .unwrap();
            path
        }

        fn leftover_files(&self) -> usize {
            std::fs::read_dir(self.work_dir.path()).unwrap().count()
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([1, 2, 3]))
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_upload_local_small_image_uploads_original() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );
        let path = h.write_png("small.png", 300, 200);

        let result = h.processor.upload_local(&path).await.unwrap();

        assert!(!result.media_id.is_empty());
        assert!(!result.remote_url.is_empty());
        assert_eq!((result.width, result.height), (Some(300), Some(200)));
        assert!(result.warnings.is_empty());

        let uploads = h.store.get_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upload_local_wide_image_uploads_compressed_copy() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );
        let path = h.write_png("wide.png", 3000, 1500);

        let result = h.processor.upload_local(&path).await.unwrap();

        assert_eq!((result.width, result.height), (Some(1920), Some(960)));
        let uploads = h.store.get_uploads();
        assert_eq!(uploads.len(), 1);
        assert_ne!(uploads[0].0, path);
        assert!(uploads[0].0.starts_with(h.work_dir.path()));

        assert!(!uploads[0].0.exists());
        assert_eq!(h.leftover_files(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upload_local_missing_file() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );

        let err = h
            .processor
            .upload_local(Path::new("/no/such/photo.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(h.store.get_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_local_text_file_is_unsupported() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );
        let path = h.input_dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let err = h.processor.upload_local(&path).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert_eq!(h.store.get_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_compress_failure_falls_back_to_original() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            Some(MockCompressor::new().with_failure(true)),
            fast_settings(),
        );
        let path = h.write_png("photo.png", 64, 64);

        let result = h.processor.upload_local(&path).await.unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("compression skipped"));
        assert_eq!(h.store.get_uploads()[0].0, path);
    }

    #[tokio::test]
    async fn test_compression_disabled_skips_compressor() {
        let compressor = MockCompressor::new().with_copy();
        let counter = compressor.clone();
        let settings = IngestSettings {
            compress_images: false,
            ..fast_settings()
        };
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            Some(compressor),
            settings,
        );
        let path = h.write_png("photo.png", 64, 64);

        h.processor.upload_local(&path).await.unwrap();

        assert_eq!(counter.get_compress_count(), 0);
        assert_eq!(h.store.get_uploads()[0].0, path);
    }

    #[tokio::test]
    async fn test_upload_failure_still_removes_compressed_file() {
        let h = build_harness(
            MockMediaStore::new().with_transient_failures(3),
            MockFetcher::new(),
            Some(MockCompressor::new().with_copy()),
            fast_settings(),
        );
        let path = h.write_png("photo.png", 64, 64);

        let err = h.processor.upload_local(&path).await.unwrap_err();

        assert!(matches!(err, Error::UploadFailed { attempts: 3, .. }));
        assert_eq!(h.store.get_upload_count(), 3);
        assert_eq!(h.leftover_files(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_download_and_upload_cleans_up_download() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new().with_body(png_bytes(40, 20)),
            None,
            fast_settings(),
        );

        let result = h
            .processor
            .download_and_upload("https://example.com/pic.png")
            .await
            .unwrap();

        assert_eq!((result.width, result.height), (Some(40), Some(20)));
        let created = h.fetcher.get_created_paths();
        assert_eq!(created.len(), 1);
        assert!(!created[0].exists());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn test_download_failure_is_reported() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new().with_failure(true),
            None,
            fast_settings(),
        );

        let err = h
            .processor
            .download_and_upload("https://example.com/pic.png")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadFailed { .. }));
        assert_eq!(h.store.get_upload_count(), 0);
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn test_downloaded_non_image_is_invalid() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new().with_body(b"<html>nope</html>".to_vec()),
            None,
            fast_settings(),
        );

        let err = h
            .processor
            .download_and_upload("https://example.com/page")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidImage(_)));
        assert_eq!(h.store.get_upload_count(), 0);
        assert_eq!(h.leftover_files(), 0);
    }

    /// Accepts every upload but never answers in time.
    #[derive(Clone, Default)]
    struct StalledStore {
        received: Arc<Mutex<Vec<PathBuf>>>,
    }

    #[async_trait::async_trait]
    impl MediaStore for StalledStore {
        async fn upload(&self, path: &Path) -> Result<RemoteMedia> {
            self.received.lock().unwrap().push(path.to_path_buf());
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(RemoteMedia {
                media_id: "late".to_string(),
                url: "https://cdn.test/late".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_ingest_within_deadline() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );
        let path = h.write_png("photo.png", 10, 10);

        let result = h
            .processor
            .ingest_within(&ImageReference::Local(path), Duration::from_secs(30))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_expired_deadline_releases_download_and_compressed_file() {
        let work_dir = TempDir::new().unwrap();
        let store = StalledStore::default();
        let fetcher = MockFetcher::new()
            .with_body(png_bytes(2500, 200))
            .with_work_dir(work_dir.path());
        let processor = Processor::with_services(
            ProcessorServices {
                store: Box::new(store.clone()),
                fetcher: Box::new(fetcher.clone()),
                compressor: Box::new(Compressor::new(work_dir.path())),
            },
            fast_settings(),
        );

        let deadline = Duration::from_secs(5);
        let err = processor
            .ingest_within(
                &ImageReference::Remote("https://example.com/wide.png".to_string()),
                deadline,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded(d) if d == deadline));

        // The upload had started with the compressed copy before time ran out
        let received = store.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert!(received[0].starts_with(work_dir.path()));
        assert!(received[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("compressed-"));
        assert!(!received[0].exists());

        let created = fetcher.get_created_paths();
        assert_eq!(created.len(), 1);
        assert!(!created[0].exists());
        assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_process_batch_skips_failures() {
        let h = build_harness(
            MockMediaStore::new(),
            MockFetcher::new(),
            None,
            fast_settings(),
        );
        let good = h.write_png("good.png", 10, 10);
        let missing = h.input_dir.path().join("missing.png");

        let batch = ImageBatch::collect([
            good.to_string_lossy().to_string(),
            missing.to_string_lossy().to_string(),
            good.to_string_lossy().to_string(),
        ]);
        let report = h.processor.process_batch(&batch).await;

        assert_eq!(report.uploaded.len(), 1);
        assert!(report.uploaded.contains_key(&1));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].ordinal, 2);
        assert!(report.failed[0].error.contains("file not found"));
        assert_eq!(h.store.get_upload_count(), 1);
    }

    #[test]
    fn test_with_compress_quality_is_a_builder() {
        let processor = Processor::with_services(
            ProcessorServices {
                store: Box::new(MockMediaStore::new()),
                fetcher: Box::new(MockFetcher::new()),
                compressor: Box::new(MockCompressor::new()),
            },
            IngestSettings::default(),
        )
        .with_compress_quality(60);

        assert_eq!(processor.settings().compress.quality, 60);
    }
}
