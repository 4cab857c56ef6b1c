use tokio::sync::{broadcast, mpsc};

use crate::inference::InferenceRequest;
use crate::types::ImageProgressEvent;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Channel to send inference requests
    pub inference_tx: mpsc::Sender<InferenceRequest>,
    /// Broadcast channel for generation progress events (Sender is Clone)
    pub progress_tx: broadcast::Sender<ImageProgressEvent>,
}
