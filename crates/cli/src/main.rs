//! `artgen` -- submit one prompt to a generation backend and wait for the
//! images.
//!
//! The prompt is taken from the command-line arguments; everything else
//! comes from the environment (see [`config::ArtgenConfig::from_env`]).
//! Ctrl-C cancels the running job.

mod config;

use std::sync::Arc;

use artgen_client::{DecodedImage, ImageSink, JobClient, RateLimiter};
use artgen_core::executor::capture;
use artgen_core::JobRequest;
use artgen_engine::{RegistryConfig, TaskRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ArtgenConfig;

/// Logs each image as it arrives on the main thread.
struct LogSink;

impl ImageSink for LogSink {
    fn on_image_ready(&self, index: usize, image: Arc<DecodedImage>) {
        let (width, height) = image.dimensions();
        tracing::info!(index, url = %image.url, width, height, "Image ready");
    }

    fn on_images_ready(&self, images: Vec<Arc<DecodedImage>>) {
        tracing::info!(count = images.len(), "All images ready");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artgen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        tracing::error!("Usage: artgen <prompt>");
        std::process::exit(2);
    }

    let config = ArtgenConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %format!("{e:#}"), "Invalid configuration");
        std::process::exit(1);
    });

    if let Err(e) = run(config, prompt).await {
        tracing::error!(error = %format!("{e:#}"), "Generation failed");
        std::process::exit(1);
    }
}

async fn run(config: ArtgenConfig, prompt: String) -> anyhow::Result<()> {
    let (context, mut queue) = capture()?;

    let limiter = Arc::new(RateLimiter::new(config.min_request_interval));
    let registry = Arc::new(TaskRegistry::new(
        JobClient::new(limiter),
        context,
        RegistryConfig { poll: config.poll },
    ));

    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(
                task_id = %event.task_id,
                kind = event.kind.as_str(),
                detail = event.detail.as_deref().unwrap_or(""),
                "Task event",
            );
        }
    });

    let canceller = registry.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            canceller.cancel_all();
        }
    });

    tracing::info!(
        endpoint = %config.endpoint.name,
        host = %config.endpoint.host,
        seed = config.generation.seed.as_deref().unwrap_or("backend"),
        "Submitting prompt",
    );

    let request =
        JobRequest::new(Arc::new(config.endpoint), prompt).with_generation(&config.generation);
    let images = queue
        .run_until(registry.run(request, Arc::new(LogSink)))
        .await?;

    tracing::info!(count = images.len(), "Generation finished");
    Ok(())
}
