pub mod architecture;
pub mod checkpoint;
pub mod codec;
pub mod gate;
pub mod loss;
pub mod shape;
pub mod variables;

use burn::prelude::*;

use crate::model::shape::{InputShape, PoolConfig};

/// Stacked autoencoder configuration
#[derive(Config, Debug)]
pub struct StackedAutoencoderConfig {
    /// Declared input shape (batch, height, width, channels)
    pub input_shape: InputShape,

    /// Number of encoder/decoder layer pairs
    pub layer_num: usize,

    /// Output feature maps of each hidden layer
    pub hidden_outputs: Vec<usize>,

    /// Kernel sizes, one shared by every layer or one per layer
    #[config(default = "vec![[3, 3]]")]
    pub filter_sizes: Vec<[usize; 2]>,

    /// Downsampling window of the encoders
    #[config(default = "PoolConfig::default()")]
    pub pool: PoolConfig,

    /// Kernel initialiser standard deviation
    #[config(default = 5e-2)]
    pub stddev: f64,

    /// Name prefix for every parameter of the stack
    #[config(default = "String::from(\"stack_autoencoder\")")]
    pub scope: String,
}

impl StackedAutoencoderConfig {
    /// Two layer stack over 64x64 RGB images
    pub fn rgb_default() -> Self {
        Self::new(InputShape::image(64, 64, 3), 2, vec![16, 32])
    }

    /// Two layer stack over 28x28 grayscale images, for quick runs
    pub fn small() -> Self {
        Self::new(InputShape::image(28, 28, 1), 2, vec![8, 16])
    }

    /// Three layer stack with a wider first kernel
    pub fn deep() -> Self {
        Self::new(InputShape::image(64, 64, 3), 3, vec![32, 64, 128])
            .with_filter_sizes(vec![[5, 5], [3, 3], [3, 3]])
    }
}
