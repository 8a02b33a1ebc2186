//! Job submissions and the parameters attached to them.

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use serde_json::{Map, Value};

use crate::endpoint::EndpointConfig;
use crate::error::CoreError;

/// Prefix of the data URL carried in the `image` field.
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Default edge length of generated images, in pixels.
pub const DEFAULT_BASE_RESOLUTION: u32 = 512;

/// Size and seed settings translated into submission parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Height of the output; width is derived from the aspect ratio.
    pub base_resolution: u32,
    /// Width divided by height.
    pub aspect_ratio: f32,
    /// Fixed seed for reproducible output. `None` lets the backend choose.
    pub seed: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            base_resolution: DEFAULT_BASE_RESOLUTION,
            aspect_ratio: 1.0,
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Replace the seed with a random non-negative 31-bit value.
    pub fn randomize_seed(&mut self) -> &str {
        let seed: i32 = rand::rng().random_range(0..i32::MAX);
        self.seed.insert(seed.to_string())
    }

    /// Build the `width` / `height` / `seed` parameter map.
    pub fn to_parameters(&self) -> Map<String, Value> {
        let height = self.base_resolution;
        let width = (self.base_resolution as f32 * self.aspect_ratio).round() as u32;

        let mut params = Map::new();
        params.insert("width".into(), Value::from(width));
        params.insert("height".into(), Value::from(height));
        if let Some(seed) = self.seed.as_deref().filter(|s| !s.is_empty()) {
            let value = seed
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(seed));
            params.insert("seed".into(), value);
        }
        params
    }
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// One submission to a generation backend.
#[derive(Debug, Clone)]
pub struct JobRequest {
    config: Arc<EndpointConfig>,
    pub prompt: String,
    /// Extra backend parameters, flattened into the request body.
    pub parameters: Map<String, Value>,
    /// Source image for image-to-image jobs, as a base64 data URL.
    pub source_image: Option<String>,
    /// Assigned by the backend once submission succeeds.
    pub job_id: Option<String>,
}

impl JobRequest {
    pub fn new(config: Arc<EndpointConfig>, prompt: impl Into<String>) -> Self {
        Self {
            config,
            prompt: prompt.into(),
            parameters: Map::new(),
            source_image: None,
            job_id: None,
        }
    }

    pub fn config(&self) -> &Arc<EndpointConfig> {
        &self.config
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_generation(mut self, params: &GenerationParams) -> Self {
        self.parameters.extend(params.to_parameters());
        self
    }

    /// Attach PNG bytes as the source image.
    pub fn with_source_png(mut self, png: &[u8]) -> Self {
        self.source_image = Some(format!("{PNG_DATA_URL_PREFIX}{}", BASE64.encode(png)));
        self
    }

    /// PNG-encode `image` and attach it as the source image.
    pub fn with_source_image(self, image: &image::DynamicImage) -> Result<Self, CoreError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| CoreError::Validation(format!("Failed to encode source image: {e}")))?;
        Ok(self.with_source_png(&png))
    }

    /// A fresh copy for resubmission, without the assigned job id.
    pub fn reroll(&self) -> Self {
        Self {
            job_id: None,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.config.validate()
    }

    /// Flat JSON submission body: parameters, then `prompt` and `image`.
    ///
    /// Parameters named `prompt` or `image` are overwritten.
    pub fn to_body(&self) -> Value {
        let mut body = self.parameters.clone();
        body.insert("prompt".into(), Value::from(self.prompt.clone()));
        if let Some(image) = &self.source_image {
            body.insert("image".into(), Value::from(image.clone()));
        }
        Value::Object(body)
    }
}
