//! Stable Diffusion sampling pipeline
//!
//! Drives one text-to-image generation:
//! 1. tokenize and encode the prompt and optional negative prompt (in parallel)
//! 2. draw the initial latent from the seeded noise source
//! 3. for each scheduled timestep, predict noise with the UNet and apply one
//!    DDIM step
//! 4. decode the final latent to pixels
//!
//! Any engine failure aborts the generation; nothing is retried and no
//! partial image is returned.

use serde::{Deserialize, Serialize};

use crate::engines::{self, Engines, ModelResources};
use crate::error::{PipelineError, Result};
use crate::noise::{self, NoiseSource};
use crate::output::GeneratedImage;
use crate::scheduler::DdimScheduler;
use crate::tensor::Tensor;
use crate::tokenizer::ClipTokenizer;

/// Per-request generation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Denoising steps, at most the scheduler's 50 inference timesteps
    pub steps: usize,
    pub batch_size: usize,
    pub width: u32,
    pub height: u32,
    /// 0 draws the initial latent from OS entropy
    pub seed: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: 50,
            batch_size: 1,
            width: 512,
            height: 512,
            seed: 0,
        }
    }
}

impl GenerationConfig {
    /// Check the settings against what the scheduler and VAE support
    pub fn validate(&self, max_steps: usize) -> Result<()> {
        if self.steps == 0 || self.steps > max_steps {
            return Err(PipelineError::InvalidConfig(format!(
                "steps must be between 1 and {}, got {}",
                max_steps, self.steps
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.width == 0 || self.height == 0 || self.width % 8 != 0 || self.height % 8 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "width and height must be positive multiples of 8, got {}x{}",
                self.width, self.height
            )));
        }
        self.pixel_count().ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "batch of {} at {}x{} is too large",
                self.batch_size, self.width, self.height
            ))
        })?;
        Ok(())
    }

    /// Elements in the decoded `[batch, 3, height, width]` output, `None` on overflow
    ///
    /// Bounds the latent as well, which is 48 times smaller.
    fn pixel_count(&self) -> Option<usize> {
        self.batch_size
            .checked_mul(3)?
            .checked_mul(usize::try_from(self.height).ok()?)?
            .checked_mul(usize::try_from(self.width).ok()?)
    }
}

/// Stage of a running generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Encoding,
    Denoising,
    Decoding,
    Complete,
    Failed,
}

/// Progress report emitted while a generation runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationEvent {
    pub status: GenerationStatus,
    /// Denoising steps finished so far
    pub step: usize,
    pub total_steps: usize,
    /// Overall progress (0.0 to 1.0); decoding counts as one extra step
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationEvent {
    fn new(status: GenerationStatus, step: usize, total_steps: usize) -> Self {
        let progress = match status {
            GenerationStatus::Complete => 1.0,
            _ => step as f32 / (total_steps + 1) as f32,
        };
        Self {
            status,
            step,
            total_steps,
            progress,
            error: None,
        }
    }

    fn failed(step: usize, total_steps: usize, err: &PipelineError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(GenerationStatus::Failed, step, total_steps)
        }
    }
}

/// Encoded prompts for one generation
pub struct Conditioning {
    pub positive: Tensor,
    pub negative: Option<Tensor>,
}

/// Tokenizer, scheduler and engines for one model
pub struct StableDiffusionPipeline {
    tokenizer: ClipTokenizer,
    scheduler: DdimScheduler,
    engines: Engines,
}

impl StableDiffusionPipeline {
    pub fn new(tokenizer: ClipTokenizer, engines: Engines) -> Self {
        Self {
            tokenizer,
            scheduler: DdimScheduler::new(),
            engines,
        }
    }

    /// Load the vocabulary and engines for a located model
    pub fn load(resources: &ModelResources) -> Result<Self> {
        tracing::info!("Loading tokenizer vocabulary from {:?}", resources.vocab);
        let tokenizer = ClipTokenizer::from_file(&resources.vocab)?;
        tracing::info!("Vocabulary loaded ({} entries)", tokenizer.vocab_size());

        let engines = engines::preview::load(resources)?;
        Ok(Self::new(tokenizer, engines))
    }

    pub fn tokenizer(&self) -> &ClipTokenizer {
        &self.tokenizer
    }

    /// Generate `config.batch_size` images for a prompt
    pub fn generate(
        &mut self,
        prompt: &str,
        negative_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<Vec<GeneratedImage>> {
        self.generate_with_progress(prompt, negative_prompt, config, |_| {})
    }

    /// Generate with a callback receiving progress after every stage and step
    pub fn generate_with_progress<F>(
        &mut self,
        prompt: &str,
        negative_prompt: Option<&str>,
        config: &GenerationConfig,
        mut on_progress: F,
    ) -> Result<Vec<GeneratedImage>>
    where
        F: FnMut(&GenerationEvent),
    {
        let mut noise = noise::noise_source(config.seed);
        let mut completed = 0;
        let result = self.run(
            prompt,
            negative_prompt,
            config,
            noise.as_mut(),
            &mut completed,
            &mut on_progress,
        );

        match &result {
            Ok(images) => {
                tracing::info!("Generated {} image(s) {}x{}", images.len(), config.width, config.height);
                on_progress(&GenerationEvent::new(GenerationStatus::Complete, config.steps, config.steps));
            }
            Err(e) => {
                tracing::error!("Generation failed after {} step(s): {}", completed, e);
                on_progress(&GenerationEvent::failed(completed, config.steps, e));
            }
        }
        result
    }

    fn run(
        &mut self,
        prompt: &str,
        negative_prompt: Option<&str>,
        config: &GenerationConfig,
        noise: &mut dyn NoiseSource,
        completed: &mut usize,
        on_progress: &mut dyn FnMut(&GenerationEvent),
    ) -> Result<Vec<GeneratedImage>> {
        config.validate(self.scheduler.inference_steps())?;
        let steps = config.steps;

        tracing::info!(
            "Image generation request: prompt='{}', size={}x{}, steps={}, batch={}, seed={}",
            prompt,
            config.width,
            config.height,
            steps,
            config.batch_size,
            config.seed
        );

        on_progress(&GenerationEvent::new(GenerationStatus::Encoding, 0, steps));
        let conditioning = self.encode_prompts(prompt, negative_prompt)?;

        let shape = noise::latent_shape(config.batch_size, config.width, config.height);
        let mut latent = noise::random_latent(&shape, noise);

        tracing::debug!("Running DDIM denoising ({} steps)...", steps);
        for (i, &timestep) in self.scheduler.timesteps()[..steps].iter().enumerate() {
            let noise_pred = self
                .engines
                .unet
                .predict(&latent, timestep, &conditioning.positive)?;
            noise_pred.expect_shape("unet", latent.shape())?;

            latent = self.scheduler.step(&noise_pred, timestep, &latent);
            *completed = i + 1;

            tracing::debug!("  Step {}/{}: t={}", i + 1, steps, timestep);
            on_progress(&GenerationEvent::new(GenerationStatus::Denoising, i + 1, steps));
        }

        tracing::debug!("Decoding latents...");
        on_progress(&GenerationEvent::new(GenerationStatus::Decoding, steps, steps));
        let pixels = self.engines.decoder.decode(&latent)?;
        pixels.expect_shape(
            "decoder",
            &[config.batch_size, 3, config.height as usize, config.width as usize],
        )?;

        Ok(GeneratedImage::from_decoder_output(&pixels))
    }

    /// Encode the prompt and negative prompt concurrently, joining both
    pub fn encode_prompts(&self, prompt: &str, negative_prompt: Option<&str>) -> Result<Conditioning> {
        let tokenizer = &self.tokenizer;
        let encoder = self.engines.text_encoder.as_ref();
        let encode = move |text: &str| {
            let tokens = tokenizer.encode_tensor(text);
            tracing::debug!("Tokens for '{}': {}", text, tokenizer.decode(tokens.data()));
            encoder.encode(&tokens)
        };

        let (positive, negative) = std::thread::scope(|s| {
            let positive_task = s.spawn(move || encode(prompt));
            let negative_task = negative_prompt.map(|text| s.spawn(move || encode(text)));

            let positive = join_task(positive_task);
            let negative = negative_task.map(join_task);
            (positive, negative)
        });

        let positive = positive?;
        let negative = negative.transpose()?;

        if let Some(ref negative) = negative {
            negative.expect_shape("text_encoder", positive.shape())?;
        }

        Ok(Conditioning { positive, negative })
    }
}

fn join_task<T>(handle: std::thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
