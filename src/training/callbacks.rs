use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::training::{StageSummary, TrainingResult, TrainingState};

/// Training callback trait
///
/// Callbacks allow custom actions at the boundaries of a greedy run.
pub trait TrainingCallback: Send + Sync {
    /// Called once before the first stage
    fn on_train_begin(&mut self, _layer_num: usize) {}

    /// Called before training `layer`
    fn on_stage_begin(&mut self, _layer: usize) {}

    /// Called at the end of each epoch with its mean loss
    fn on_epoch_end(&mut self, _state: &TrainingState, _loss: f64) {}

    fn on_stage_end(&mut self, _summary: &StageSummary) {}

    fn on_train_end(&mut self, _result: &TrainingResult) {}
}

/// Callback manager that handles multiple callbacks
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback<C: TrainingCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn on_train_begin(&mut self, layer_num: usize) {
        for callback in &mut self.callbacks {
            callback.on_train_begin(layer_num);
        }
    }

    pub fn on_stage_begin(&mut self, layer: usize) {
        for callback in &mut self.callbacks {
            callback.on_stage_begin(layer);
        }
    }

    pub fn on_epoch_end(&mut self, state: &TrainingState, loss: f64) {
        for callback in &mut self.callbacks {
            callback.on_epoch_end(state, loss);
        }
    }

    pub fn on_stage_end(&mut self, summary: &StageSummary) {
        for callback in &mut self.callbacks {
            callback.on_stage_end(summary);
        }
    }

    pub fn on_train_end(&mut self, result: &TrainingResult) {
        for callback in &mut self.callbacks {
            callback.on_train_end(result);
        }
    }
}

/// Progress logging callback
pub struct ProgressLoggerCallback {
    log_frequency: usize,
    stage_start: Option<Instant>,
}

impl ProgressLoggerCallback {
    pub fn new(log_frequency: usize) -> Self {
        Self {
            log_frequency: log_frequency.max(1),
            stage_start: None,
        }
    }
}

impl TrainingCallback for ProgressLoggerCallback {
    fn on_train_begin(&mut self, layer_num: usize) {
        tracing::info!("Greedy training of {} layers", layer_num);
    }

    fn on_stage_begin(&mut self, layer: usize) {
        self.stage_start = Some(Instant::now());
        tracing::info!("Stage {}: training hidden_{}", layer, layer);
    }

    fn on_epoch_end(&mut self, state: &TrainingState, loss: f64) {
        if state.epoch % self.log_frequency == 0 {
            tracing::info!(
                "Stage {} epoch {} - Loss: {:.6}, LR: {:.2e}",
                state.stage,
                state.epoch,
                loss,
                state.lr_history.last().copied().unwrap_or_default()
            );
        }
    }

    fn on_stage_end(&mut self, summary: &StageSummary) {
        let elapsed = self
            .stage_start
            .take()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(summary.duration_secs);
        tracing::info!(
            "Stage {} done in {} - final loss {:.6}",
            summary.layer,
            crate::utils::format_duration(elapsed),
            summary.final_loss
        );
    }

    fn on_train_end(&mut self, result: &TrainingResult) {
        tracing::info!(
            "Training completed in {} - MSE {:.6}, PSNR {:.2} dB",
            crate::utils::format_duration(result.duration_secs),
            result.final_mse,
            result.final_psnr
        );
    }
}

/// One row of the loss history file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub stage: usize,
    pub epoch: usize,
    pub loss: f64,
    pub lr: f64,
}

/// Writes every epoch's loss to a JSON file
pub struct LossHistoryCallback {
    log_file: PathBuf,
    history: Vec<EpochRecord>,
}

impl LossHistoryCallback {
    pub fn new<P: AsRef<Path>>(log_file: P) -> Self {
        Self {
            log_file: log_file.as_ref().to_path_buf(),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.history)?;
        std::fs::write(&self.log_file, json)?;
        Ok(())
    }
}

impl TrainingCallback for LossHistoryCallback {
    fn on_epoch_end(&mut self, state: &TrainingState, loss: f64) {
        self.history.push(EpochRecord {
            stage: state.stage,
            epoch: state.epoch,
            loss,
            lr: state.lr_history.last().copied().unwrap_or_default(),
        });
    }

    fn on_stage_end(&mut self, _summary: &StageSummary) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to save loss history: {}", e);
        }
    }

    fn on_train_end(&mut self, _result: &TrainingResult) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to save final loss history: {}", e);
        }
    }
}
