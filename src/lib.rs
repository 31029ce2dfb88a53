//! # stackae: stacked convolutional autoencoders
//!
//! Builds a symmetric stack of convolutional encoders and decoders in which
//! every hidden layer can be trained on its own. A per-pass control signal
//! decides how many layers take part in the computation, so one model serves
//! every stage of greedy layer-wise training.
//!
//! ## Features
//!
//! - Encoders with SAME convolution, ReLU and max-pooling
//! - Decoders that upsample to the exact size their encoder consumed
//! - Per-layer parameter lookup for layer-specific optimizers
//! - Greedy trainer with checkpoints, schedulers and callbacks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use burn::backend::{Autodiff, NdArray};
//! use burn::prelude::*;
//! use stackae::model::gate::ControlSignal;
//! use stackae::model::StackedAutoencoderConfig;
//! use stackae::training::{trainer::GreedyTrainer, TrainingConfig};
//!
//! type B = Autodiff<NdArray<f32>>;
//! let device = Default::default();
//!
//! // Build once, run with any number of unlocked layers
//! let config = StackedAutoencoderConfig::rgb_default();
//! let model = config.init::<B>(&device).unwrap();
//! let input = Tensor::<B, 4>::zeros([8, 3, 64, 64], &device);
//! let output = model.forward(input.clone(), ControlSignal::new(1)).unwrap();
//! let code = output.encoded(None).unwrap();
//! let first_layer_params = model.variables_for_layer(0, None);
//!
//! // Or let the trainer walk through the layers
//! let mut trainer = GreedyTrainer::<B>::new(TrainingConfig::default(), config, device);
//! let (trained, result) = trainer.train(&[input]).unwrap();
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Backend used for training
pub type TrainBackend = Autodiff<DefaultBackend>;

/// Re-export commonly used types
pub use error::StackError;
pub use model::architecture::{StackOutput, StackedAutoencoder};
pub use model::gate::ControlSignal;
pub use model::StackedAutoencoderConfig;
pub use training::{TrainingConfig, TrainingResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - stacked convolutional autoencoders with greedy layer-wise training",
        NAME, VERSION
    )
}
