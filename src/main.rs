use anyhow::{Context, Result};
use burn::config::Config;
use stackae::cli::{model_config, parse_args, setup_logging, Commands, InitConfigArgs, InspectArgs, TrainArgs};
use stackae::data::SyntheticImages;
use stackae::model::architecture::StackLayout;
use stackae::model::checkpoint::CheckpointMetadata;
use stackae::training::callbacks::{LossHistoryCallback, ProgressLoggerCallback};
use stackae::training::trainer::GreedyTrainer;
use stackae::training::TrainingConfig;
use stackae::utils::format_number;
use stackae::{DefaultBackend, TrainBackend};
use tracing::{error, info};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", stackae::info());

    let result = match cli.command {
        Commands::Inspect(args) => run_inspect(args),
        Commands::InitConfig(args) => run_init_config(args),
        Commands::Train(args) => run_train(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let config = model_config(args.config.as_deref(), args.preset)?;
    let layout = StackLayout::plan(&config)?;

    let device = Default::default();
    let model = config.init::<DefaultBackend>(&device)?;

    println!("scope:    {}", layout.scope);
    println!("layers:   {}", layout.layer_num());
    println!("channels: {:?}", layout.channels);
    println!("control:  {}", model.control_signal().name());
    println!();
    println!("depth  size");
    for (depth, [height, width]) in layout.shapes.iter().enumerate() {
        println!("{depth:>5}  {height}x{width}");
    }

    println!();
    println!("{:<48} {:>16} {:>10}", "parameter", "shape", "count");
    let index = model.variable_index();
    for ((layer, role), records) in index.iter() {
        let trainable = model.variables_for_layer(*layer, None).len();
        println!("hidden_{layer} {role} ({trainable} trainable in layer)");
        for record in records {
            println!(
                "  {:<46} {:>16} {:>10}",
                record.name,
                format!("{:?}", record.shape),
                format_number(record.num_elements())
            );
        }
    }
    println!();
    println!("total parameters: {}", format_number(index.num_params()));

    Ok(())
}

fn run_init_config(args: InitConfigArgs) -> Result<()> {
    stackae::utils::ensure_dir(&args.output)?;

    let model_path = args.output.join("model.json");
    args.preset
        .model_config()
        .save(&model_path)
        .with_context(|| format!("Failed to write {:?}", model_path))?;

    let training = if args.quick {
        TrainingConfig::quick_test()
    } else {
        TrainingConfig::default()
    };
    let training_path = args.output.join("training.json");
    training.save(&training_path)?;

    info!("Wrote {:?} and {:?}", model_path, training_path);
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let model_config = model_config(args.config.as_deref(), args.preset)?;
    let training_config = args.training_config()?;
    let layout = StackLayout::plan(&model_config)?;

    info!("Output directory: {:?}", args.output);
    stackae::utils::ensure_dir(&args.output)?;
    let checkpoint_dir = args.output.join("checkpoints");

    let device = Default::default();
    let images = SyntheticImages::new(layout.input, training_config.seed);
    let batches = images.batches::<TrainBackend>(
        training_config.batches_per_epoch,
        training_config.batch_size,
        &device,
    );
    info!(
        "Generated {} batches of {} images ({}x{}x{})",
        batches.len(),
        training_config.batch_size,
        layout.input.height,
        layout.input.width,
        layout.input.channels
    );

    let mut trainer = GreedyTrainer::<TrainBackend>::new(training_config.clone(), model_config.clone(), device)
        .with_checkpoint_dir(&checkpoint_dir)?
        .with_callback(ProgressLoggerCallback::new(1))
        .with_callback(LossHistoryCallback::new(args.output.join("loss_history.json")));

    let (model, result) = trainer.train(&batches).context("Training failed")?;

    let final_loss = result
        .stages
        .last()
        .map(|stage| stage.final_loss)
        .unwrap_or(f64::NAN);
    let metadata = CheckpointMetadata::new(
        layout.layer_num() - 1,
        training_config.epochs_per_layer,
        final_loss,
        model_config,
        training_config.metadata(),
    )
    .with_frozen_layers(if training_config.freeze_trained_layers {
        (0..layout.layer_num()).collect()
    } else {
        Vec::new()
    });
    let manager = stackae::model::checkpoint::CheckpointManager::new(&checkpoint_dir)?;
    let final_path = manager.save_final(&model, &metadata)?;

    let report_path = args.output.join("training_result.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&result)?)
        .with_context(|| format!("Failed to write {:?}", report_path))?;

    info!("=== Training Results ===");
    for stage in &result.stages {
        info!("  hidden_{}: loss {:.6} after {} epochs", stage.layer, stage.final_loss, stage.epochs);
    }
    info!("Reconstruction MSE: {:.6}", result.final_mse);
    info!("PSNR: {:.2} dB", result.final_psnr);
    info!("Training time: {}", stackae::utils::format_duration(result.duration_secs));
    info!("Final model saved to: {:?}", final_path);

    Ok(())
}
