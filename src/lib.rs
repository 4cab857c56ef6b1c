//! Text-to-image sampling with a DDIM scheduler
//!
//! The [`pipeline::StableDiffusionPipeline`] drives three inference engines
//! (text encoder, noise predictor, latent decoder) through one generation.
//! The HTTP service in `main.rs` owns a pipeline on a dedicated inference
//! thread and exposes it through an OpenAI-style images API.

pub mod config;
pub mod engines;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod noise;
pub mod output;
pub mod pipeline;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod tensor;
pub mod tokenizer;
pub mod types;
pub mod utils;

pub use error::{FailurePhase, PipelineError};
pub use output::GeneratedImage;
pub use pipeline::{GenerationConfig, GenerationEvent, GenerationStatus, StableDiffusionPipeline};
