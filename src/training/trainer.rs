use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::StackError;
use crate::model::architecture::{StackOutput, StackedAutoencoder};
use crate::model::checkpoint::{CheckpointManager, CheckpointMetadata};
use crate::model::gate::ControlSignal;
use crate::model::loss::{metrics, ReconstructionLoss};
use crate::model::StackedAutoencoderConfig;
use crate::training::callbacks::{CallbackManager, TrainingCallback};
use crate::training::scheduler::LearningRateScheduler;
use crate::training::{StageSummary, TrainingConfig, TrainingResult, TrainingState};
use crate::utils::random::seeded_rng;

/// Greedy layer-wise trainer for a stacked autoencoder.
///
/// Stage `k` unlocks layers `0..=k` and updates only the encoder and decoder
/// of layer `k`, with a fresh optimizer per stage.
pub struct GreedyTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    model_config: StackedAutoencoderConfig,
    device: B::Device,
    checkpoint_manager: Option<CheckpointManager>,
    callbacks: CallbackManager,
    state: TrainingState,
    last_output: Option<StackOutput<B::InnerBackend>>,
}

impl<B: AutodiffBackend> GreedyTrainer<B> {
    pub fn new(
        config: TrainingConfig,
        model_config: StackedAutoencoderConfig,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            model_config,
            device,
            checkpoint_manager: None,
            callbacks: CallbackManager::new(),
            state: TrainingState::new(),
            last_output: None,
        }
    }

    /// Write a checkpoint after every stage
    pub fn with_checkpoint_dir<P: AsRef<Path>>(mut self, checkpoint_dir: P) -> Result<Self> {
        self.checkpoint_manager = Some(CheckpointManager::new(checkpoint_dir)?);
        Ok(self)
    }

    pub fn with_callback<C: TrainingCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.add_callback(callback);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Most recent training pass, detached from the autodiff graph
    pub fn last_output(&self) -> std::result::Result<&StackOutput<B::InnerBackend>, StackError> {
        self.last_output.as_ref().ok_or(StackError::NotBuilt)
    }

    /// Build a fresh stack and train every layer in turn
    pub fn train(&mut self, batches: &[Tensor<B, 4>]) -> Result<(StackedAutoencoder<B>, TrainingResult)> {
        self.config.validate()?;
        let start_time = Instant::now();

        let mut model = self
            .model_config
            .init::<B>(&self.device)
            .context("Failed to build the stack")?;
        let layer_num = model.layer_num();

        info!("Starting greedy training with configuration: {:?}", self.config);
        self.callbacks.on_train_begin(layer_num);

        let mut stages = Vec::with_capacity(layer_num);
        let mut checkpoints = Vec::new();
        let mut frozen = Vec::new();

        for layer in 0..layer_num {
            let (trained, summary) = self.train_stage(model, layer, batches)?;
            model = trained;

            if self.config.freeze_trained_layers {
                model = model.freeze_layer(layer);
                frozen.push(layer);
            }

            if let Some(path) = self.save_stage(&model, &summary, &frozen)? {
                checkpoints.push(path);
            }
            stages.push(summary);
        }

        let final_mse = self.evaluate(&model, batches)?;
        let result = TrainingResult {
            stages,
            final_mse,
            final_psnr: metrics::psnr(final_mse, 1.0),
            checkpoints,
            duration_secs: start_time.elapsed().as_secs_f64(),
        };

        self.callbacks.on_train_end(&result);
        Ok((model, result))
    }

    /// Train encoder and decoder `layer` of `model` on `batches`
    pub fn train_stage(
        &mut self,
        model: StackedAutoencoder<B>,
        layer: usize,
        batches: &[Tensor<B, 4>],
    ) -> Result<(StackedAutoencoder<B>, StageSummary)> {
        if layer >= model.layer_num() {
            return Err(StackError::IndexOutOfRange {
                index: layer,
                layer_num: model.layer_num(),
            }
            .into());
        }
        if batches.is_empty() {
            bail!("no training batches supplied");
        }

        let start_time = Instant::now();
        self.state.start_stage(layer);
        self.callbacks.on_stage_begin(layer);

        let param_ids = model.variable_index().param_ids(layer, None);
        if param_ids.is_empty() {
            warn!("Layer {} has no trainable parameters, skipping", layer);
            let summary = StageSummary {
                layer,
                epochs: 0,
                loss_history: Vec::new(),
                final_loss: f64::NAN,
                trained: false,
                duration_secs: 0.0,
            };
            self.callbacks.on_stage_end(&summary);
            return Ok((model, summary));
        }

        let mut optim = AdamConfig::new()
            .with_weight_decay(
                (self.config.weight_decay > 0.0)
                    .then(|| WeightDecayConfig::new(self.config.weight_decay as f32)),
            )
            .init::<B, StackedAutoencoder<B>>();
        let scheduler = LearningRateScheduler::from_kind(
            &self.config.lr_scheduler,
            self.config.learning_rate,
            self.config.epochs_per_layer,
        );
        let loss_fn = ReconstructionLoss::new(self.config.sparsity_weight);
        let control = ControlSignal::new(layer + 1);

        let progress = self.progress_bar(layer);
        let mut rng = seeded_rng(self.config.seed.wrapping_add(layer as u64));
        let mut order: Vec<usize> = (0..batches.len()).collect();
        let mut model = model;

        for epoch in 0..self.config.epochs_per_layer {
            let lr = scheduler.get_lr(epoch);
            order.shuffle(&mut rng);

            let mut total_loss = 0.0;
            for &index in &order {
                let output = model.forward(batches[index].clone(), control)?;
                let loss = loss_fn.forward(&output, layer)?;
                total_loss += loss.clone().into_scalar().elem::<f64>();

                let mut grads = loss.backward();
                let grads = GradientsParams::from_params::<B, _>(&mut grads, &model, &param_ids);
                model = optim.step(lr, model, grads);

                self.last_output = Some(output.inner());
                self.state.global_step += 1;
            }

            let mean_loss = total_loss / batches.len() as f64;
            self.state.update_epoch(mean_loss, lr);
            debug!("Stage {} epoch {}: loss {:.6}", layer, epoch + 1, mean_loss);
            self.callbacks.on_epoch_end(&self.state, mean_loss);

            progress.set_message(format!("loss {mean_loss:.5}"));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let summary = StageSummary {
            layer,
            epochs: self.state.epoch,
            loss_history: self.state.train_loss_history.clone(),
            final_loss: self.state.last_loss().unwrap_or(f64::NAN),
            trained: true,
            duration_secs: start_time.elapsed().as_secs_f64(),
        };
        self.callbacks.on_stage_end(&summary);

        Ok((model, summary))
    }

    /// Mean reconstruction error of the whole stack on `batches`
    pub fn evaluate(&self, model: &StackedAutoencoder<B>, batches: &[Tensor<B, 4>]) -> Result<f64> {
        if batches.is_empty() {
            bail!("no evaluation batches supplied");
        }

        let model = model.valid();
        let control = ControlSignal::all(model.layer_num());

        let mut total = 0.0;
        for batch in batches {
            let input = batch.clone().inner();
            let output = model.forward(input.clone(), control)?;
            total += metrics::mse(output.into_decoded(), input);
        }
        Ok(total / batches.len() as f64)
    }

    fn save_stage(
        &self,
        model: &StackedAutoencoder<B>,
        summary: &StageSummary,
        frozen: &[usize],
    ) -> Result<Option<PathBuf>> {
        let Some(manager) = &self.checkpoint_manager else {
            return Ok(None);
        };

        let metadata = CheckpointMetadata::new(
            summary.layer,
            summary.epochs,
            summary.final_loss,
            self.model_config.clone(),
            self.config.metadata(),
        )
        .with_frozen_layers(frozen.to_vec());

        manager.save_stage(model, &metadata).map(Some)
    }

    fn progress_bar(&self, layer: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(self.config.epochs_per_layer as u64);
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        progress.set_style(style);
        progress.set_prefix(format!("hidden_{layer}"));
        progress
    }
}
