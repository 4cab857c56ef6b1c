//! DDIM scheduler with the SD 1.x linear beta schedule
//!
//! The schedule is fixed: 1000 training timesteps, betas linear in
//! [0.00085, 0.012], and 50 inference timesteps taken at a stride of 20
//! starting from 999.
//!
//! Denoising Diffusion Implicit Models, J. Song et al, 2020.
//! https://arxiv.org/abs/2010.02502

use crate::tensor::Tensor;

/// Number of training timesteps
pub const TRAIN_STEPS: usize = 1000;
/// Number of inference timesteps
pub const INFERENCE_STEPS: usize = 50;
/// Beta at t = 0
pub const BETA_START: f64 = 0.00085;
/// Beta at t = TRAIN_STEPS - 1
pub const BETA_END: f64 = 0.012;

/// Precomputed DDIM noise schedule and update rule
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
}

impl Default for DdimScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DdimScheduler {
    pub fn new() -> Self {
        let betas: Vec<f64> = (0..TRAIN_STEPS)
            .map(|t| BETA_START + t as f64 * (BETA_END - BETA_START) / (TRAIN_STEPS - 1) as f64)
            .collect();

        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();

        let mut alphas_cumprod = Vec::with_capacity(TRAIN_STEPS);
        let mut cumprod = 1.0f64;
        for &alpha in &alphas {
            cumprod *= alpha;
            alphas_cumprod.push(cumprod);
        }

        let step_ratio = TRAIN_STEPS / INFERENCE_STEPS;
        let timesteps = (0..INFERENCE_STEPS)
            .map(|i| TRAIN_STEPS - 1 - i * step_ratio)
            .collect();

        Self {
            alphas,
            alphas_cumprod,
            timesteps,
        }
    }

    /// Inference timesteps, most noisy first
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }

    pub fn train_steps(&self) -> usize {
        TRAIN_STEPS
    }

    pub fn inference_steps(&self) -> usize {
        self.timesteps.len()
    }

    fn alpha_cumprod_at(&self, t: usize) -> f64 {
        assert!(
            t < self.alphas_cumprod.len(),
            "timestep {} outside schedule of {} steps",
            t,
            self.alphas_cumprod.len()
        );
        self.alphas_cumprod[t]
    }

    /// One reverse-diffusion step: `x_t` and predicted noise at `timestep` to `x_{t-1}`
    ///
    /// Deterministic (eta = 0). Panics if `timestep` is outside the training
    /// schedule or if the tensors differ in shape.
    pub fn step(&self, model_output: &Tensor, timestep: usize, sample: &Tensor) -> Tensor {
        let prev_timestep = timestep.saturating_sub(1);

        let alpha_prod_t = self.alpha_cumprod_at(timestep);
        let beta_prod_t = 1.0 - alpha_prod_t;
        let alpha_prod_t_prev = self.alpha_cumprod_at(prev_timestep);
        let beta_prod_t_prev = 1.0 - alpha_prod_t_prev;

        let sqrt_beta_t = beta_prod_t.sqrt() as f32;
        let sqrt_alpha_t = alpha_prod_t.sqrt() as f32;
        let sqrt_alpha_prev = alpha_prod_t_prev.sqrt() as f32;
        let noise_coeff = beta_prod_t_prev.sqrt() as f32;

        // x_0 = (x_t - sqrt(1 - a_t) * eps) / sqrt(a_t)
        // x_{t-1} = sqrt(a_{t-1}) * x_0 + sqrt(1 - a_{t-1}) * eps
        sample.zip_map(model_output, |x_t, eps| {
            let pred_original = (x_t - sqrt_beta_t * eps) / sqrt_alpha_t;
            sqrt_alpha_prev * pred_original + noise_coeff * eps
        })
    }
}
