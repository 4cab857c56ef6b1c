//! Random sources for the initial latent
//!
//! The initial latent is the only randomness in a generation. A non-zero
//! seed selects a ChaCha8 stream so the same seed reproduces the same
//! latent bit for bit; seed 0 draws from OS entropy.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::tensor::Tensor;

/// Number of latent channels for SD 1.x
pub const LATENT_CHANNELS: usize = 4;
/// VAE downsampling factor between pixels and latents
pub const VAE_SCALE_FACTOR: usize = 8;

/// A stream of random 64-bit words
pub trait NoiseSource {
    fn next_u64(&mut self) -> u64;

    /// Uniform sample in [-1, 1] built from the top 24 bits of a word
    fn next_uniform(&mut self) -> f32 {
        let bits = (self.next_u64() >> 40) as u32;
        let unit = bits as f32 / ((1u32 << 24) - 1) as f32;
        unit * 2.0 - 1.0
    }
}

impl<R: RngCore> NoiseSource for R {
    fn next_u64(&mut self) -> u64 {
        RngCore::next_u64(self)
    }
}

/// Pick the noise source for a request seed (0 = non-reproducible)
pub fn noise_source(seed: u32) -> Box<dyn NoiseSource + Send> {
    if seed == 0 {
        Box::new(ChaCha8Rng::from_entropy())
    } else {
        Box::new(ChaCha8Rng::seed_from_u64(u64::from(seed)))
    }
}

/// Latent shape `[batch, 4, height / 8, width / 8]` for an output size
pub fn latent_shape(batch_size: usize, width: u32, height: u32) -> [usize; 4] {
    [
        batch_size,
        LATENT_CHANNELS,
        height as usize / VAE_SCALE_FACTOR,
        width as usize / VAE_SCALE_FACTOR,
    ]
}

/// Fill a fresh latent of `shape` with iid uniform samples in [-1, 1]
pub fn random_latent(shape: &[usize], source: &mut dyn NoiseSource) -> Tensor {
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|_| source.next_uniform()).collect();
    Tensor::new(data, shape).expect("buffer sized from shape")
}
