use salvo::prelude::*;
use tokio::sync::oneshot;

use crate::inference::{InferenceRequest, ModelStatus};

use super::helpers::get_state;

/// GET /health - Health check
#[handler]
pub async fn health(res: &mut Response) {
    res.render(Json(serde_json::json!({
        "status": "healthy",
        "service": "diffusion-api"
    })));
}

/// GET /v1/models/status - Get current pipeline status
///
/// Answered by the inference thread, so it waits behind a running generation.
#[handler]
pub async fn model_status(depot: &mut Depot, res: &mut Response) -> Result<(), StatusError> {
    let state = get_state(depot)?;

    let (response_tx, response_rx) = oneshot::channel();
    state
        .inference_tx
        .send(InferenceRequest::GetModelStatus { response_tx })
        .await
        .map_err(|_| StatusError::internal_server_error())?;

    let status: ModelStatus = response_rx
        .await
        .map_err(|_| StatusError::internal_server_error())?;

    res.render(Json(serde_json::json!({
        "status": "success",
        "models": status
    })));
    Ok(())
}
