use std::path::Path;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::engines::ModelResources;
use crate::error::{PipelineError, Result};
use crate::pipeline::StableDiffusionPipeline;
use crate::types::ImageProgressEvent;

use super::{InferenceRequest, ModelStatus};

/// Locate the model resources and build the pipeline
fn load_pipeline(config: &Config) -> Result<(String, StableDiffusionPipeline)> {
    if config.model_dir.is_empty() {
        return Err(PipelineError::resource_load("model", "MODEL_DIR is not set"));
    }
    let resources = ModelResources::locate(
        Path::new(&config.model_dir),
        config.vocab_path.as_deref().map(Path::new),
    )?;
    let pipeline = StableDiffusionPipeline::load(&resources)?;
    Ok((resources.manifest.name, pipeline))
}

/// Inference thread that owns the pipeline
///
/// Requests are served one at a time, so at most one generation is in
/// flight. A setup failure is kept and reported to every request.
pub fn inference_thread(
    config: Config,
    mut rx: mpsc::Receiver<InferenceRequest>,
    ready_tx: oneshot::Sender<()>,
    progress_tx: broadcast::Sender<ImageProgressEvent>,
) {
    tracing::info!("Loading pipeline from: {:?}", config.model_dir);
    let mut loaded = match load_pipeline(&config) {
        Ok((name, pipeline)) => {
            tracing::info!("Pipeline loaded successfully: {}", name);
            Ok((name, pipeline))
        }
        Err(e) => {
            tracing::warn!("Failed to load pipeline: {}", e);
            Err(e)
        }
    };

    // Signal that the pipeline is loaded
    let _ = ready_tx.send(());

    tracing::info!("Inference thread ready, processing requests...");

    while let Some(request) = rx.blocking_recv() {
        match request {
            InferenceRequest::Image {
                request_id,
                prompt,
                negative_prompt,
                config,
                response_tx,
            } => {
                let result = match loaded {
                    Ok((_, ref mut pipeline)) => pipeline.generate_with_progress(
                        &prompt,
                        negative_prompt.as_deref(),
                        &config,
                        |event| {
                            // No subscribers is fine
                            let _ = progress_tx.send(ImageProgressEvent {
                                request_id: request_id.clone(),
                                event: event.clone(),
                            });
                        },
                    ),
                    Err(ref e) => Err(e.clone()),
                };
                let _ = response_tx.send(result);
            }
            InferenceRequest::GetModelStatus { response_tx } => {
                let status = match loaded {
                    Ok((ref name, _)) => ModelStatus {
                        loaded: true,
                        model: Some(name.clone()),
                        setup_error: None,
                    },
                    Err(ref e) => ModelStatus {
                        loaded: false,
                        model: None,
                        setup_error: Some(e.to_string()),
                    },
                };
                let _ = response_tx.send(status);
            }
        }
    }

    tracing::info!("Inference thread shutting down");
}
