pub mod callbacks;
pub mod scheduler;
pub mod trainer;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::checkpoint::TrainingMetadata;
use crate::training::scheduler::SchedulerKind;

/// Greedy layer-wise training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Epochs spent on each layer
    pub epochs_per_layer: usize,
    /// Images per batch
    pub batch_size: usize,
    /// Batches drawn per epoch when training on generated data
    pub batches_per_epoch: usize,
    pub learning_rate: f64,
    /// Learning rate schedule, restarted at every stage
    pub lr_scheduler: SchedulerKind,
    /// Weight decay (L2 regularization), 0 disables it
    pub weight_decay: f64,
    /// L1 penalty on the code of the layer being trained, 0 disables it
    pub sparsity_weight: f64,
    /// Freeze each layer once its stage is over
    pub freeze_trained_layers: bool,
    /// Random seed
    pub seed: u64,
    /// Draw a progress bar per stage
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs_per_layer: 10,
            batch_size: 16,
            batches_per_epoch: 8,
            learning_rate: 1e-3,
            lr_scheduler: SchedulerKind::Cosine { eta_min: 1e-5 },
            weight_decay: 1e-4,
            sparsity_weight: 0.0,
            freeze_trained_layers: true,
            seed: 2026,
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Create configuration for quick testing
    pub fn quick_test() -> Self {
        Self {
            epochs_per_layer: 2,
            batch_size: 4,
            batches_per_epoch: 2,
            learning_rate: 1e-2,
            lr_scheduler: SchedulerKind::Constant,
            show_progress: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs_per_layer == 0 {
            bail!("epochs_per_layer must be positive");
        }
        if self.batch_size == 0 || self.batches_per_epoch == 0 {
            bail!("batch_size and batches_per_epoch must be positive");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.weight_decay < 0.0 || self.sparsity_weight < 0.0 {
            bail!("weight_decay and sparsity_weight must not be negative");
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read training config {:?}", path))?;
        serde_json::from_str(&json).context("Failed to parse training config")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize training config")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write training config {:?}", path.as_ref()))
    }

    /// Summary stored next to checkpoints
    pub fn metadata(&self) -> TrainingMetadata {
        TrainingMetadata {
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            epochs_per_layer: self.epochs_per_layer,
            sparsity_weight: self.sparsity_weight,
            optimizer: "Adam".to_string(),
        }
    }
}

/// Progress of a training run
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Layer currently being trained
    pub stage: usize,
    /// Epochs completed in the current stage
    pub epoch: usize,
    /// Optimizer steps over the whole run
    pub global_step: usize,
    /// Mean loss per epoch of the current stage
    pub train_loss_history: Vec<f64>,
    pub lr_history: Vec<f64>,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-stage counters before training `layer`
    pub fn start_stage(&mut self, layer: usize) {
        self.stage = layer;
        self.epoch = 0;
        self.train_loss_history.clear();
        self.lr_history.clear();
    }

    /// Update after epoch
    pub fn update_epoch(&mut self, train_loss: f64, lr: f64) {
        self.epoch += 1;
        self.train_loss_history.push(train_loss);
        self.lr_history.push(lr);
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.train_loss_history.last().copied()
    }
}

/// Outcome of one greedy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub layer: usize,
    pub epochs: usize,
    pub loss_history: Vec<f64>,
    pub final_loss: f64,
    /// False when the layer was already frozen and nothing was trained
    pub trained: bool,
    pub duration_secs: f64,
}

/// Training result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub stages: Vec<StageSummary>,
    /// Reconstruction error of the full stack after the last stage
    pub final_mse: f64,
    pub final_psnr: f64,
    /// Checkpoints written along the way
    pub checkpoints: Vec<PathBuf>,
    /// Training duration in seconds
    pub duration_secs: f64,
}
