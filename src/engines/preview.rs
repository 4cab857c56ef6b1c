//! Weight-free preview backend
//!
//! Satisfies every shape contract of the three engines without running a
//! neural network, so the service can be exercised end to end on machines
//! without an accelerator runtime:
//!
//! - the text encoder embeds each (position, token id) pair sinusoidally
//! - the UNet predicts the noise that separates the current latent from a
//!   flat per-channel target derived from the conditioning
//! - the decoder projects latents to RGB with the SD 1.x latent preview
//!   factors and upsamples 8x

use crate::error::{PipelineError, Result};
use crate::noise::{LATENT_CHANNELS, VAE_SCALE_FACTOR};
use crate::scheduler::DdimScheduler;
use crate::tensor::{Tensor, TokenTensor};
use crate::tokenizer::MAX_TOKENS;

use super::{Engines, LatentDecoder, ModelResources, NoisePredictor, TextEncoder};

/// SD 1.x latent channel to RGB projection (channels x 3)
#[rustfmt::skip]
const SD15_RGB_FACTORS: [[f32; 3]; LATENT_CHANNELS] = [
    [ 0.3512,  0.2297,  0.3227],
    [ 0.3250,  0.4974,  0.2350],
    [-0.2829,  0.1762,  0.2721],
    [-0.2120, -0.2616, -0.7177],
];

/// Build the preview engines for a located model
pub fn load(resources: &ModelResources) -> Result<Engines> {
    let hidden_size = resources.manifest.hidden_size;
    if hidden_size < LATENT_CHANNELS {
        return Err(PipelineError::resource_load(
            resources.model_dir.display().to_string(),
            format!("hidden_size must be at least {}, got {}", LATENT_CHANNELS, hidden_size),
        ));
    }
    tracing::info!("Loading preview engines (hidden_size={})", hidden_size);
    // Weight files are located but not read
    for (engine, path) in [
        ("text encoder", &resources.text_encoder),
        ("unet", &resources.unet),
        ("decoder", &resources.decoder),
    ] {
        tracing::debug!("  {} weights at {:?} (unused by preview backend)", engine, path);
    }

    Ok(Engines::new(
        PreviewTextEncoder::new(hidden_size),
        PreviewUnet::new(hidden_size),
        PreviewDecoder,
    ))
}

pub struct PreviewTextEncoder {
    hidden_size: usize,
}

impl PreviewTextEncoder {
    pub fn new(hidden_size: usize) -> Self {
        Self { hidden_size }
    }
}

impl TextEncoder for PreviewTextEncoder {
    fn encode(&self, tokens: &TokenTensor) -> Result<Tensor> {
        tokens.expect_shape("text_encoder", &[1, MAX_TOKENS])?;

        let hidden = self.hidden_size;
        let mut data = Vec::with_capacity(MAX_TOKENS * hidden);
        for (pos, &id) in tokens.data().iter().enumerate() {
            for i in 0..hidden {
                let freq = 1.0 / 10000f32.powf((i / 2 * 2) as f32 / hidden as f32);
                let angle = (id as f32 + pos as f32) * freq;
                data.push(if i % 2 == 0 { angle.sin() } else { angle.cos() });
            }
        }
        Tensor::new(data, &[1, MAX_TOKENS, hidden])
    }
}

pub struct PreviewUnet {
    hidden_size: usize,
    schedule: DdimScheduler,
}

impl PreviewUnet {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            schedule: DdimScheduler::new(),
        }
    }

    /// Per-channel target value: mean of one quarter of the hidden features
    fn channel_targets(&self, conditioning: &Tensor) -> [f32; LATENT_CHANNELS] {
        let hidden = self.hidden_size;
        let chunk = hidden / LATENT_CHANNELS;
        let mut sums = [0.0f32; LATENT_CHANNELS];
        for row in conditioning.data().chunks(hidden) {
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum += row[c * chunk..(c + 1) * chunk].iter().sum::<f32>();
            }
        }
        let count = (conditioning.len() / hidden * chunk).max(1) as f32;
        sums.map(|s| (s / count * 4.0).tanh())
    }
}

impl NoisePredictor for PreviewUnet {
    fn predict(&self, latent: &Tensor, timestep: usize, conditioning: &Tensor) -> Result<Tensor> {
        if latent.shape().len() != 4 || latent.dim(1) != LATENT_CHANNELS {
            return Err(PipelineError::ShapeMismatch {
                stage: "unet",
                expected: vec![latent.shape().first().copied().unwrap_or(1), LATENT_CHANNELS, 0, 0],
                actual: latent.shape().to_vec(),
            });
        }
        conditioning.expect_shape("unet", &[1, MAX_TOKENS, self.hidden_size])?;
        if timestep >= self.schedule.train_steps() {
            return Err(PipelineError::inference("unet", format!("timestep {} out of range", timestep)));
        }

        let targets = self.channel_targets(conditioning);
        let alpha = self.schedule.alphas_cumprod()[timestep];
        let sqrt_alpha = alpha.sqrt() as f32;
        let sqrt_one_minus = (1.0 - alpha).sqrt() as f32;

        let plane = latent.dim(2) * latent.dim(3);
        let data = latent
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let x0 = targets[(i / plane) % LATENT_CHANNELS];
                (x - sqrt_alpha * x0) / sqrt_one_minus
            })
            .collect();
        Tensor::new(data, latent.shape())
    }
}

pub struct PreviewDecoder;

impl LatentDecoder for PreviewDecoder {
    fn decode(&self, latent: &Tensor) -> Result<Tensor> {
        let shape = latent.shape();
        if shape.len() != 4 || shape[1] != LATENT_CHANNELS {
            return Err(PipelineError::ShapeMismatch {
                stage: "decoder",
                expected: vec![shape.first().copied().unwrap_or(1), LATENT_CHANNELS, 0, 0],
                actual: shape.to_vec(),
            });
        }
        let (batch, lh, lw) = (shape[0], shape[2], shape[3]);
        let (h, w) = (lh * VAE_SCALE_FACTOR, lw * VAE_SCALE_FACTOR);
        let src = latent.data();

        let mut data = vec![0.0f32; batch * 3 * h * w];
        for b in 0..batch {
            for y in 0..h {
                for x in 0..w {
                    let (ly, lx) = (y / VAE_SCALE_FACTOR, x / VAE_SCALE_FACTOR);
                    for rgb in 0..3 {
                        let value: f32 = (0..LATENT_CHANNELS)
                            .map(|c| {
                                src[((b * LATENT_CHANNELS + c) * lh + ly) * lw + lx] * SD15_RGB_FACTORS[c][rgb]
                            })
                            .sum();
                        data[((b * 3 + rgb) * h + y) * w + x] = value.clamp(-1.0, 1.0);
                    }
                }
            }
        }
        Tensor::new(data, &[batch, 3, h, w])
    }
}
