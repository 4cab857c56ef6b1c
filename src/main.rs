//! diffusion-api: OpenAI-compatible image generation server
//!
//! Provides endpoints for:
//! - GET  /health - Health check
//! - GET  /v1/models/status - Pipeline load status
//! - POST /v1/images/generations - Text-to-image generation
//! - GET  /v1/images/progress - SSE generation progress stream
//!
//! The pipeline is owned by a dedicated inference thread; handlers reach it
//! through a channel, so only one generation runs at a time.

use eyre::Context;
use salvo::prelude::*;
use tokio::sync::{broadcast, mpsc, oneshot};

use diffusion_api::config::Config;
use diffusion_api::inference::{self, InferenceRequest};
use diffusion_api::router;
use diffusion_api::state::AppState;
use diffusion_api::types::ImageProgressEvent;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diffusion_api=info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Starting diffusion-api server on port {}", config.port);

    let (inference_tx, inference_rx) = mpsc::channel::<InferenceRequest>(32);
    let (progress_tx, _) = broadcast::channel::<ImageProgressEvent>(256);
    let (ready_tx, ready_rx) = oneshot::channel();

    // Spawn inference thread (owns the pipeline)
    let config_clone = config.clone();
    let progress_tx_clone = progress_tx.clone();
    std::thread::spawn(move || {
        inference::inference_thread(config_clone, inference_rx, ready_tx, progress_tx_clone);
    });

    // Wait for the pipeline to load
    ready_rx
        .await
        .context("Failed to receive ready signal from inference thread")?;
    tracing::info!("Inference thread ready");

    let state = AppState {
        inference_tx,
        progress_tx,
    };

    let router = router::build_router(state);

    let listen_addr = format!("0.0.0.0:{}", config.port);
    let acceptor = TcpListener::new(&listen_addr).bind().await;

    tracing::info!("HTTP server listening on http://{}", listen_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /v1/models/status");
    tracing::info!("  POST /v1/images/generations");
    tracing::info!("  GET  /v1/images/progress");

    Server::new(acceptor).serve(router).await;

    Ok(())
}
