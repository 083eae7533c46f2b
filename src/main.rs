use anyhow::Result;
use clap::Parser;
use md_image_uploader::batch::ImageBatch;
use md_image_uploader::image::MIN_QUALITY;
use md_image_uploader::models::Config;
use md_image_uploader::processor::Processor;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "md-image-uploader")]
#[command(about = "Compress and upload document images, printing media IDs and URLs as JSON")]
struct CliArgs {
    /// Local paths or http(s) URLs, in document order.
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<String>,

    /// Starting JPEG quality when re-encoding oversized images (40-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(i64::from(MIN_QUALITY)..=100))]
    quality: Option<u8>,

    /// Upload images exactly as found.
    #[arg(long)]
    no_compress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "md_image_uploader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if args.no_compress {
        config.compress_images = false;
    }

    let mut processor = match Processor::new(&config).await {
        Ok(processor) => processor,
        Err(e) => {
            error!("Failed to initialize processor: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(quality) = args.quality {
        processor = processor.with_compress_quality(quality);
    }

    let batch = ImageBatch::collect(&args.images);
    info!("Processing {} image(s)", batch.len());

    let report = processor.process_batch(&batch).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.uploaded.is_empty() && !report.failed.is_empty() {
        error!("No images could be uploaded");
        std::process::exit(2);
    }
    Ok(())
}
