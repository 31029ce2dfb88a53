use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::architecture::StackedAutoencoder;
use crate::model::StackedAutoencoderConfig;

const STAGE_PREFIX: &str = "stage_";
const FINAL_NAME: &str = "final_model.mpk";

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Crate version that wrote the checkpoint
    pub version: String,
    /// Last completed greedy stage (layer index)
    pub stage: usize,
    /// Epochs run in that stage
    pub epochs: usize,
    /// Final mean loss of the stage
    pub loss: f64,
    /// Configuration used to rebuild the stack
    pub model_config: StackedAutoencoderConfig,
    /// Layers frozen at save time
    #[serde(default)]
    pub frozen_layers: Vec<usize>,
    pub training: TrainingMetadata,
    /// Seconds since the unix epoch
    pub timestamp: u64,
}

/// Training settings recorded alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs_per_layer: usize,
    pub sparsity_weight: f64,
    pub optimizer: String,
}

impl CheckpointMetadata {
    pub fn new(
        stage: usize,
        epochs: usize,
        loss: f64,
        model_config: StackedAutoencoderConfig,
        training: TrainingMetadata,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            version: crate::VERSION.to_string(),
            stage,
            epochs,
            loss,
            model_config,
            frozen_layers: Vec::new(),
            training,
            timestamp,
        }
    }

    pub fn with_frozen_layers(mut self, layers: Vec<usize>) -> Self {
        self.frozen_layers = layers;
        self
    }
}

/// Checkpoint manager for saving and loading stacks between stages
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    /// Maximum number of stage checkpoints to keep
    max_checkpoints: usize,
}

impl CheckpointManager {
    /// Create new checkpoint manager
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)
            .context("Failed to create checkpoint directory")?;

        Ok(Self {
            checkpoint_dir,
            max_checkpoints: 5,
        })
    }

    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max.max(1);
        self
    }

    /// Save the stack after a greedy stage
    pub fn save_stage<B: Backend>(
        &self,
        model: &StackedAutoencoder<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf> {
        let path = self
            .checkpoint_dir
            .join(format!("{STAGE_PREFIX}{}.mpk", metadata.stage));
        write_checkpoint(model, metadata, &path)?;
        info!("Saved stage {} checkpoint: {:?}", metadata.stage, path);

        self.cleanup_old_checkpoints()?;
        Ok(path)
    }

    /// Save the fully trained stack
    pub fn save_final<B: Backend>(
        &self,
        model: &StackedAutoencoder<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf> {
        let path = self.checkpoint_dir.join(FINAL_NAME);
        write_checkpoint(model, metadata, &path)?;
        info!("Saved final model: {:?}", path);
        Ok(path)
    }

    /// Rebuild a stack from its stored config and load the weights into it
    pub fn load_checkpoint<B: Backend>(
        &self,
        checkpoint_path: &Path,
        device: &B::Device,
    ) -> Result<(StackedAutoencoder<B>, CheckpointMetadata)> {
        info!("Loading checkpoint from {:?}", checkpoint_path);

        let metadata_path = checkpoint_path.with_extension("json");
        let metadata_json = fs::read_to_string(&metadata_path)
            .with_context(|| format!("Failed to read metadata file {metadata_path:?}"))?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_json)
            .context("Failed to parse metadata")?;

        let record = CompactRecorder::new()
            .load(checkpoint_path.to_path_buf(), device)
            .context("Failed to load model checkpoint")?;

        let mut model = metadata
            .model_config
            .init::<B>(device)
            .context("Stored model config is invalid")?
            .load_record(record);
        for &layer in &metadata.frozen_layers {
            model = model.freeze_layer(layer);
        }

        info!("Loaded checkpoint from stage {}", metadata.stage);
        Ok((model, metadata))
    }

    pub fn load_final<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<(StackedAutoencoder<B>, CheckpointMetadata)> {
        let path = self.checkpoint_dir.join(FINAL_NAME);
        if !path.exists() {
            anyhow::bail!("No final model found at {:?}", path);
        }
        self.load_checkpoint(&path, device)
    }

    /// Load the checkpoint of the deepest completed stage
    pub fn load_latest<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<(StackedAutoencoder<B>, CheckpointMetadata)> {
        let latest = self
            .list_checkpoints()?
            .into_iter()
            .max_by_key(|(stage, _)| *stage)
            .map(|(_, path)| path)
            .with_context(|| format!("No checkpoints found in {:?}", self.checkpoint_dir))?;

        self.load_checkpoint(&latest, device)
    }

    /// Stage checkpoints as `(stage, path)`, in no particular order
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints = Vec::new();

        for entry in fs::read_dir(&self.checkpoint_dir)
            .context("Failed to read checkpoint directory")?
        {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.extension().map(|e| e != "mpk").unwrap_or(true) {
                continue;
            }

            let stage = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(STAGE_PREFIX))
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(stage) = stage {
                checkpoints.push((stage, path));
            }
        }

        Ok(checkpoints)
    }

    /// Keep only the `max_checkpoints` deepest stages
    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;
        if checkpoints.len() <= self.max_checkpoints {
            return Ok(());
        }

        checkpoints.sort_by_key(|(stage, _)| *stage);
        let to_remove = checkpoints.len() - self.max_checkpoints;
        for (_, path) in checkpoints.into_iter().take(to_remove) {
            debug!("Removing old checkpoint: {:?}", path);
            fs::remove_file(&path).ok();
            fs::remove_file(path.with_extension("json")).ok();
        }

        Ok(())
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }
}

fn write_checkpoint<B: Backend>(
    model: &StackedAutoencoder<B>,
    metadata: &CheckpointMetadata,
    path: &Path,
) -> Result<()> {
    CompactRecorder::new()
        .record(model.clone().into_record(), path.to_path_buf())
        .context("Failed to save model checkpoint")?;

    let metadata_json = serde_json::to_string_pretty(metadata)
        .context("Failed to serialize metadata")?;
    fs::write(path.with_extension("json"), metadata_json)
        .context("Failed to write metadata file")?;

    Ok(())
}
