//! Inference engines consumed by the sampling pipeline
//!
//! The pipeline only sees three capabilities, each a fixed-shape tensor to
//! tensor mapping. Backends implement them and are loaded once, when the
//! pipeline is built.

pub mod preview;
mod resources;

pub use resources::{ModelResources, DECODER_RESOURCE, TEXT_ENCODER_RESOURCE, UNET_RESOURCE, VOCAB_RESOURCE};

use crate::error::Result;
use crate::tensor::{Tensor, TokenTensor};

/// Text encoder: `[1, 77]` token ids to a conditioning tensor
pub trait TextEncoder: Send + Sync {
    fn encode(&self, tokens: &TokenTensor) -> Result<Tensor>;
}

/// Noise predictor (UNet): predicts the noise in `latent` at `timestep`
///
/// The output must have the same shape as `latent`.
pub trait NoisePredictor: Send {
    fn predict(&self, latent: &Tensor, timestep: usize, conditioning: &Tensor) -> Result<Tensor>;
}

/// Latent decoder (VAE): latent to pixels `[batch, 3, height, width]` in [-1, 1]
pub trait LatentDecoder: Send {
    fn decode(&self, latent: &Tensor) -> Result<Tensor>;
}

/// The three engines a pipeline drives
pub struct Engines {
    pub text_encoder: Box<dyn TextEncoder>,
    pub unet: Box<dyn NoisePredictor>,
    pub decoder: Box<dyn LatentDecoder>,
}

impl Engines {
    pub fn new(
        text_encoder: impl TextEncoder + 'static,
        unet: impl NoisePredictor + 'static,
        decoder: impl LatentDecoder + 'static,
    ) -> Self {
        Self {
            text_encoder: Box::new(text_encoder),
            unet: Box::new(unet),
            decoder: Box::new(decoder),
        }
    }
}
