use std::time::Duration;

use salvo::prelude::*;
use salvo::sse::{SseEvent, SseKeepAlive};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::{classify, render_error};
use crate::inference::InferenceRequest;
use crate::output::GeneratedImage;
use crate::pipeline::GenerationConfig;
use crate::types::{ImageData, ImageGenerationRequest, ImageGenerationResponse};
use crate::utils::parse_size;

use super::helpers::{get_state, send_and_wait};

/// Timeout for image generation (can be slow on large sizes and batches)
const IMAGE_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

const MIN_SIZE: u32 = 64;
const MAX_SIZE: u32 = 2048;
/// Images per request, as in the OpenAI images API
const MAX_IMAGES: usize = 10;

/// Build the pipeline config for a request, enforcing the HTTP size bounds
fn generation_config(request: &ImageGenerationRequest) -> eyre::Result<GenerationConfig> {
    if !(1..=MAX_IMAGES).contains(&request.n) {
        eyre::bail!("n must be between 1 and {}, got {}", MAX_IMAGES, request.n);
    }
    let (width, height) = parse_size(&request.size)?;
    for (name, value) in [("width", width), ("height", height)] {
        if !(MIN_SIZE..=MAX_SIZE).contains(&value) {
            eyre::bail!("{} must be between {} and {}, got {}", name, MIN_SIZE, MAX_SIZE, value);
        }
    }
    Ok(GenerationConfig {
        steps: request.steps,
        batch_size: request.n,
        width,
        height,
        seed: request.seed,
    })
}

fn build_response(images: &[GeneratedImage], prompt: &str) -> eyre::Result<ImageGenerationResponse> {
    let data = images
        .iter()
        .map(|image| {
            let png = image.to_png()?;
            Ok(ImageData {
                url: None,
                b64_json: Some(base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    &png,
                )),
                revised_prompt: Some(prompt.to_string()),
            })
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    Ok(ImageGenerationResponse {
        created: chrono::Utc::now().timestamp(),
        data,
    })
}

/// POST /v1/images/generations - Image generation
#[handler]
pub async fn images_generations(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), StatusError> {
    let state = get_state(depot)?;

    let request: ImageGenerationRequest = match req.parse_json::<ImageGenerationRequest>().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to parse request: {}", e);
            render_error(
                res,
                salvo::http::StatusCode::BAD_REQUEST,
                &format!("Invalid request: {}", e),
                "invalid_request_error",
            );
            return Ok(());
        }
    };

    let config = match generation_config(&request) {
        Ok(config) => config,
        Err(e) => {
            render_error(res, salvo::http::StatusCode::BAD_REQUEST, &e.to_string(), "invalid_request_error");
            return Ok(());
        }
    };

    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    // Ids that are not valid header values are still used for progress
    let _ = res.add_header("x-request-id", &request_id, true);

    let prompt = request.prompt.clone();
    let result = send_and_wait(
        &state.inference_tx,
        |response_tx| InferenceRequest::Image {
            request_id,
            prompt: request.prompt,
            negative_prompt: request.negative_prompt,
            config,
            response_tx,
        },
        IMAGE_TIMEOUT,
    )
    .await?;

    let images = match result {
        Ok(images) => images,
        Err(e) => {
            tracing::error!("Image generation failed ({:?}): {}", e.phase(), e);
            let (status, error_type) = classify(&e);
            render_error(res, status, &e.to_string(), error_type);
            return Ok(());
        }
    };

    match build_response(&images, &prompt) {
        Ok(response) => res.render(Json(response)),
        Err(e) => {
            tracing::error!("Failed to encode images: {:#}", e);
            render_error(
                res,
                salvo::http::StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "generation_error",
            );
        }
    }
    Ok(())
}

/// GET /v1/images/progress - SSE streaming generation progress
#[handler]
pub async fn image_progress_sse(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), StatusError> {
    let state = get_state(depot)?;

    let request_id: String = req.query::<String>("request_id").unwrap_or_default();
    if request_id.is_empty() {
        render_error(
            res,
            salvo::http::StatusCode::BAD_REQUEST,
            "request_id query parameter required",
            "invalid_request_error",
        );
        return Ok(());
    }

    // Subscribe to progress events
    let rx = state.progress_tx.subscribe();

    // Lagged receivers skip the missed events
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.request_id == request_id => {
            let data = serde_json::to_string(&event).ok()?;
            let sse_event = SseEvent::default().text(data);
            Some(Ok::<_, std::convert::Infallible>(sse_event))
        }
        _ => None,
    });

    SseKeepAlive::new(stream).stream(res);
    Ok(())
}
