use tokio::sync::oneshot;

use crate::error::PipelineError;
use crate::output::GeneratedImage;
use crate::pipeline::GenerationConfig;

/// Request sent to the inference thread
pub enum InferenceRequest {
    Image {
        /// Tags progress events broadcast while this request runs
        request_id: String,
        prompt: String,
        negative_prompt: Option<String>,
        config: GenerationConfig,
        response_tx: oneshot::Sender<Result<Vec<GeneratedImage>, PipelineError>>,
    },
    /// Get current model status
    GetModelStatus {
        response_tx: oneshot::Sender<ModelStatus>,
    },
}

/// Current status of the pipeline
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
}
