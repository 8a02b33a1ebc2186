//! Result asset download and decoding.
//!
//! Downloads run on the background surface. Each decoded image is
//! handed to the caller's [`ImageSink`] on the owning thread as soon as
//! it is ready, and the full ordered set follows once every download
//! succeeded. A failed download aborts the batch: images already handed
//! over stay delivered, nothing further is delivered.

use std::sync::Arc;

use artgen_core::ContextHandle;
use image::{DynamicImage, GenericImageView};
use tokio_util::sync::CancellationToken;

use crate::api::JobClient;
use crate::error::JobError;

/// One decoded result image and the URL it came from.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub url: String,
    pub image: DynamicImage,
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Receiver of decoded images. Both methods run on the owning thread.
pub trait ImageSink: Send + Sync + 'static {
    /// Image `index` of the batch is ready.
    fn on_image_ready(&self, index: usize, image: Arc<DecodedImage>);

    /// Every image of the batch is ready, in input order.
    fn on_images_ready(&self, _images: Vec<Arc<DecodedImage>>) {}
}

#[derive(Clone)]
pub struct AssetFetcher {
    http: reqwest::Client,
    context: ContextHandle,
}

impl AssetFetcher {
    pub fn new(http: reqwest::Client, context: ContextHandle) -> Self {
        Self { http, context }
    }

    /// Download and decode a single image off the owning thread.
    pub async fn fetch_one(&self, url: &str) -> Result<DecodedImage, JobError> {
        self.context
            .background(download_and_decode(self.http.clone(), url.to_string()))
            .await
    }

    /// Fetch `urls` one after another, in order.
    ///
    /// Cancellation is checked before each download and before each
    /// delivery. A download already in flight completes but is not
    /// delivered.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
        sink: Arc<dyn ImageSink>,
    ) -> Result<Vec<Arc<DecodedImage>>, JobError> {
        let mut images = Vec::with_capacity(urls.len());

        for (index, url) in urls.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let image = Arc::new(self.fetch_one(url).await?);
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            tracing::debug!(index, url = %url, "Asset decoded");

            let item = image.clone();
            let target = sink.clone();
            self.context
                .foreground(move || target.on_image_ready(index, item))
                .await?;
            images.push(image);
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let batch = images.clone();
        self.context
            .foreground(move || sink.on_images_ready(batch))
            .await?;
        Ok(images)
    }
}

async fn download_and_decode(http: reqwest::Client, url: String) -> Result<DecodedImage, JobError> {
    let response = http.get(&url).send().await?;
    let response = JobClient::ensure_success(response).await?;
    let bytes = response.bytes().await?;

    let image = image::load_from_memory(&bytes).map_err(|e| JobError::Decode {
        url: url.clone(),
        reason: e.to_string(),
    })?;
    Ok(DecodedImage { url, image })
}
