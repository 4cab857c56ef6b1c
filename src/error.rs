use salvo::prelude::*;

use crate::types::{ApiError, ApiErrorDetail};

/// Result alias for the sampling pipeline
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// When a pipeline failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Loading vocabulary or model resources; no generation can run
    Setup,
    /// A single generation request; the pipeline stays usable
    Generation,
}

/// Errors surfaced by the sampling pipeline and its collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load {resource}: {reason}")]
    ResourceLoad { resource: String, reason: String },

    #[error("shape mismatch in {stage}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{stage} inference failed: {message}")]
    Inference { stage: &'static str, message: String },

    #[error("invalid generation config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn resource_load(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ResourceLoad {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(stage: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Inference {
            stage,
            message: message.to_string(),
        }
    }

    pub fn phase(&self) -> FailurePhase {
        match self {
            Self::ResourceLoad { .. } => FailurePhase::Setup,
            _ => FailurePhase::Generation,
        }
    }
}

/// Render a standardized error response with proper HTTP status code
pub fn render_error(res: &mut Response, status: salvo::http::StatusCode, message: &str, error_type: &str) {
    res.status_code(status);
    res.render(Json(ApiError {
        error: ApiErrorDetail {
            message: message.to_string(),
            r#type: error_type.to_string(),
            code: None,
        },
    }));
}

/// Map a pipeline failure to its HTTP status and OpenAI-style error type
pub fn classify(err: &PipelineError) -> (salvo::http::StatusCode, &'static str) {
    use salvo::http::StatusCode;
    match err {
        PipelineError::ResourceLoad { .. } => (StatusCode::SERVICE_UNAVAILABLE, "setup_error"),
        PipelineError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        PipelineError::ShapeMismatch { .. } | PipelineError::Inference { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "generation_error")
        }
    }
}
