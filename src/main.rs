use anyhow::{Context, Result, bail};
use clap::Parser;
use influence_predictor::{
    CoreKind, PredictorSettings, Trainer, TrainerConfig,
    data::{self, SequenceDataset},
    export::{export_model, model_dir_for},
    tch::Device,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Experiment YAML holding the controlled agent's influence predictor settings
    #[arg(short, long)]
    experiment: PathBuf,

    /// Trainer TOML with the training hyperparameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding inputs and outputs, defaults to the experiment's model folder
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Overrides the number of training epochs
    #[arg(long)]
    epochs: Option<u64>,

    /// Overrides the recurrent core from the experiment file (GRU or RNN)
    #[arg(long)]
    core: Option<CoreKind>,

    /// Only record the loss curves, skip exporting the model
    #[arg(long)]
    no_save: bool,

    /// Train on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrainerConfig::from_file(path)
            .with_context(|| format!("Failed to load trainer config {path:?}"))?,
        None => TrainerConfig::default(),
    };

    let settings = PredictorSettings::from_file(&args.experiment)
        .with_context(|| format!("Failed to read experiment {:?}", args.experiment))?;
    config = config.with_predictor_settings(settings);

    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if let Some(core) = args.core {
        config.core = core;
    }
    if args.no_save {
        config.save_model = false;
    }
    if args.cpu {
        config.device_type = Device::Cpu;
    }

    let model_dir = model_dir_for(&args.experiment);
    let data_dir = args.data.clone().unwrap_or_else(|| model_dir.clone());
    if !data::data_exists(&data_dir) {
        bail!(
            "No training data in {data_dir:?}, generate inputs and outputs with the simulator first"
        );
    }

    info!("Loading data from {data_dir:?}...");
    let dataset = SequenceDataset::load(&data_dir).context("Failed to load training data")?;
    info!("Data loaded");

    let mut trainer = Trainer::new(config, dataset).context("Failed to set up training")?;
    let history = trainer.train();

    history
        .save(&model_dir)
        .context("Failed to save loss curves")?;
    info!("Loss curves saved to {model_dir:?}");

    if trainer.config().save_model {
        let learner = trainer.learner();
        export_model(learner.store(), learner.predictor(), &model_dir)
            .context("Failed to export model")?;
    }

    Ok(())
}
