use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::config::Config;
use clap::{Parser, Subcommand, ValueEnum};

use crate::model::StackedAutoencoderConfig;
use crate::training::TrainingConfig;

/// stackae: greedy layer-wise stacked convolutional autoencoders
#[derive(Parser, Debug)]
#[command(name = "stackae")]
#[command(about = "Build, inspect and train stacked convolutional autoencoders")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the planned shapes and parameters of a stack
    Inspect(InspectArgs),

    /// Write model and training configuration files
    InitConfig(InitConfigArgs),

    /// Train a stack layer by layer on generated images
    Train(TrainArgs),
}

/// Built-in model configurations
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    /// 64x64 RGB, two layers
    Rgb,
    /// 28x28 grayscale, two layers
    Small,
    /// 64x64 RGB, three layers
    Deep,
}

impl Preset {
    pub fn model_config(&self) -> StackedAutoencoderConfig {
        match self {
            Preset::Rgb => StackedAutoencoderConfig::rgb_default(),
            Preset::Small => StackedAutoencoderConfig::small(),
            Preset::Deep => StackedAutoencoderConfig::deep(),
        }
    }
}

/// Inspection arguments
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Model configuration file, overrides the preset
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "rgb")]
    pub preset: Preset,
}

/// Config generation arguments
#[derive(Parser, Debug)]
pub struct InitConfigArgs {
    /// Directory receiving model.json and training.json
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    #[arg(short, long, value_enum, default_value = "rgb")]
    pub preset: Preset,

    /// Write the quick test training configuration
    #[arg(long)]
    pub quick: bool,
}

/// Training arguments
#[derive(Parser, Debug)]
pub struct TrainArgs {
    /// Model configuration file, overrides the preset
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "small")]
    pub preset: Preset,

    /// Training configuration file
    #[arg(short, long)]
    pub training_config: Option<PathBuf>,

    /// Output directory for checkpoints and logs
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Epochs per layer
    #[arg(short, long)]
    pub epochs: Option<usize>,

    #[arg(short, long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// L1 penalty on the trained code
    #[arg(long)]
    pub sparsity: Option<f64>,

    /// Random seed for weights order and generated data
    #[arg(long)]
    pub seed: Option<u64>,

    /// Quick test mode (fewer epochs and batches)
    #[arg(long)]
    pub quick: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl TrainArgs {
    /// Training configuration from file or preset, with flags applied on top
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.training_config {
            Some(path) => TrainingConfig::load(path)?,
            None if self.quick => TrainingConfig::quick_test(),
            None => TrainingConfig::default(),
        };

        if let Some(epochs) = self.epochs {
            config.epochs_per_layer = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(sparsity) = self.sparsity {
            config.sparsity_weight = sparsity;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.no_progress {
            config.show_progress = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Load a model configuration file, or fall back to `preset`
pub fn model_config(path: Option<&Path>, preset: Preset) -> Result<StackedAutoencoderConfig> {
    match path {
        Some(path) => StackedAutoencoderConfig::load(path)
            .with_context(|| format!("Failed to load model config {:?}", path)),
        None => Ok(preset.model_config()),
    }
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity, `RUST_LOG` wins when set
pub fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
