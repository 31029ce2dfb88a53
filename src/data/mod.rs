use burn::prelude::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::model::shape::ImageShape;
use crate::utils::random::seeded_rng;

/// Amplitude of the per-pixel noise added on top of each gradient
pub const NOISE_LEVEL: f32 = 0.05;

/// Deterministic generator of smooth random images in `[0, 1]`.
///
/// Every image channel is a random linear ramp plus uniform noise, which gives
/// an autoencoder spatial structure to learn without any dataset on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticImages {
    pub shape: ImageShape,
    pub seed: u64,
}

impl SyntheticImages {
    pub fn new(shape: ImageShape, seed: u64) -> Self {
        Self { shape, seed }
    }

    /// Pixel values of `batch_size` images in `[batch, channels, height, width]` order
    pub fn sample(&self, rng: &mut ChaCha8Rng, batch_size: usize) -> Vec<f32> {
        let ImageShape { height, width, channels } = self.shape;
        let mut values = Vec::with_capacity(batch_size * channels * height * width);

        for _ in 0..batch_size * channels {
            let offset: f32 = rng.gen_range(0.25..0.75);
            let slope_y: f32 = rng.gen_range(-0.5..0.5);
            let slope_x: f32 = rng.gen_range(-0.5..0.5);

            for y in 0..height {
                let fy = y as f32 / height.max(2) as f32 - 0.5;
                for x in 0..width {
                    let fx = x as f32 / width.max(2) as f32 - 0.5;
                    let noise: f32 = rng.gen_range(-NOISE_LEVEL..NOISE_LEVEL);
                    let value = offset + slope_y * fy + slope_x * fx + noise;
                    values.push(value.clamp(0.0, 1.0));
                }
            }
        }

        values
    }

    /// `count` batches of `batch_size` images, the same for every call
    pub fn batches<B: Backend>(
        &self,
        count: usize,
        batch_size: usize,
        device: &B::Device,
    ) -> Vec<Tensor<B, 4>> {
        let mut rng = seeded_rng(self.seed);
        (0..count)
            .map(|_| {
                let values = self.sample(&mut rng, batch_size);
                Tensor::from_data(
                    TensorData::new(values, self.shape.batch_dims(batch_size)),
                    device,
                )
            })
            .collect()
    }
}
