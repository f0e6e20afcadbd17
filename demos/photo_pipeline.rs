//! Photo processing pipeline
//!
//! Pipeline:
//! 1. Download: 3 workers fetch raw photos
//! 2. Resize: 4 workers shrink them, rejecting corrupt downloads
//! 3. Upload: 5 workers publish the thumbnails
//!
//! Usage: RUST_LOG=queue_pipeline=debug cargo run --example photo_pipeline --release

use queue_pipeline::{Pipeline, PipelineConfig};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug)]
struct Photo {
    id: u32,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct Thumbnail {
    id: u32,
    bytes: Vec<u8>,
}

fn download(id: u32) -> Photo {
    thread::sleep(Duration::from_millis(2));
    // Every 97th download comes back truncated
    let len = if id % 97 == 0 { 0 } else { 4096 };
    Photo {
        id,
        bytes: vec![(id % 251) as u8; len],
    }
}

fn resize(photo: Photo) -> Result<Thumbnail, String> {
    if photo.bytes.is_empty() {
        return Err(format!("photo {} is empty", photo.id));
    }
    thread::sleep(Duration::from_millis(1));
    Ok(Thumbnail {
        id: photo.id,
        bytes: photo.bytes.into_iter().step_by(16).collect(),
    })
}

fn upload(thumbnail: Thumbnail) -> String {
    thread::sleep(Duration::from_millis(3));
    format!(
        "https://photos.example/{}.jpg ({} bytes)",
        thumbnail.id,
        thumbnail.bytes.len()
    )
}

fn main() -> queue_pipeline::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig {
        queue_capacity: Some(32),
        thread_name_prefix: "photos".to_string(),
        ..PipelineConfig::default()
    };

    let pipeline = Pipeline::builder()
        .with_config(config)
        .map("download", 3, download)
        .try_map("resize", 4, resize)
        .map("upload", 5, upload)
        .build()?;

    let start = Instant::now();
    for id in 0..1000 {
        pipeline.submit(id)?;
    }

    println!("{}", pipeline.metrics_summary());
    let report = pipeline.wait_for_completion()?;

    println!("=== Photo Pipeline Results ===");
    println!("{} items finished in {:.2?}", report.succeeded(), start.elapsed());
    if let Some(sample) = report.outputs.first() {
        println!("Sample upload: {sample}");
    }
    println!("{} items failed:", report.failed());
    for failure in &report.failures {
        println!("  {failure}");
    }
    for stage in &report.stages {
        println!("  {}: {}", stage.name, stage.metrics);
    }

    Ok(())
}
