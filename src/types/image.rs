use serde::{Deserialize, Serialize};

use crate::pipeline::GenerationEvent;

#[derive(Debug, Deserialize)]
pub struct ImageGenerationRequest {
    /// Text prompt for image generation
    pub prompt: String,
    /// Text describing what the image should not contain
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Number of images to generate
    #[serde(default = "default_n")]
    pub n: usize,
    /// Image size (e.g., "512x512", "768x512")
    #[serde(default = "default_size")]
    pub size: String,
    /// Denoising steps (1-50)
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Noise seed; 0 picks a random one
    #[serde(default)]
    pub seed: u32,
    /// Client-chosen id for following progress on `/v1/images/progress`
    #[serde(default)]
    pub request_id: Option<String>,
    /// Response format: only "b64_json" is produced
    #[serde(default = "default_response_format")]
    #[allow(dead_code)]
    pub response_format: String,
}

fn default_n() -> usize {
    1
}

fn default_size() -> String {
    "512x512".to_string()
}

fn default_steps() -> usize {
    50
}

fn default_response_format() -> String {
    "b64_json".to_string()
}

#[derive(Debug, Serialize)]
pub struct ImageGenerationResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

#[derive(Debug, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Progress event broadcast to SSE subscribers
#[derive(Debug, Clone, Serialize)]
pub struct ImageProgressEvent {
    pub request_id: String,
    #[serde(flatten)]
    pub event: GenerationEvent,
}
