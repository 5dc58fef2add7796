pub mod data;
pub mod error;
pub mod experiment;
pub mod export;
pub mod learner;
pub mod model;
pub mod sampler;
pub mod util;

pub use error::{Error, Result};
pub use experiment::PredictorSettings;
pub use learner::{Learner, history::LossHistory};
pub use model::{CoreKind, RnnPredictor};
pub use tch;

use data::SequenceDataset;
use fastrand::Rng;
use serde::Deserialize;
use std::{fs, num::NonZeroUsize, path::Path, time::Instant};
use tch::Device;
use tracing::{info, warn};
use util::{AvgTracker, Report};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub batch_size: NonZeroUsize,
    pub learning_rate: f64,
    /// L2 penalty applied by Adam
    pub weight_decay: f64,
    pub num_epochs: u64,
    /// Fraction of the sequences used for training, taken from the front
    pub split_ratio: f64,
    /// Log the losses every this many epochs, set to 0 to disable
    pub log_interval: u64,
    /// Usually overridden by `numberOfHiddenStates` of the experiment file
    pub hidden_size: i64,
    /// Usually overridden by `Type` of the experiment file
    pub core: CoreKind,
    pub random_seed: i64,
    /// Intra-op threads for libtorch, None leaves libtorch's default
    pub num_threads: Option<i32>,
    pub save_model: bool,
    /// Auto will use your CUDA GPU if available
    #[serde(skip, default = "Device::cuda_if_available")]
    pub device_type: Device,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(128).unwrap(),
            learning_rate: 1e-3,
            weight_decay: 5e-4,
            num_epochs: 1000,
            split_ratio: 0.8,
            log_interval: 100,
            hidden_size: 8,
            core: CoreKind::Gru,
            random_seed: 123,
            num_threads: None,
            save_model: true,
            device_type: Device::cuda_if_available(),
        }
    }
}

impl TrainerConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&toml_str)
    }

    /// Takes the hidden size and core type from the experiment file
    pub fn with_predictor_settings(mut self, settings: PredictorSettings) -> Self {
        self.hidden_size = settings.hidden_size;
        self.core = settings.core;
        self
    }
}

/// Fits an [`RnnPredictor`] to a [`SequenceDataset`]
pub struct Trainer {
    config: TrainerConfig,
    train_set: SequenceDataset,
    test_set: SequenceDataset,
    learner: Learner,
    rng: Rng,
    history: LossHistory,
}

impl Trainer {
    pub fn new(config: TrainerConfig, dataset: SequenceDataset) -> Result<Self> {
        tch::manual_seed(config.random_seed);
        if let Some(num_threads) = config.num_threads {
            tch::set_num_threads(num_threads);
        }

        info!("Dataset: {} sequences", dataset.len());
        let output_classes = dataset.output_classes()?;
        info!("Output classes: {output_classes:?}");

        let (train_set, test_set) = dataset.split(config.split_ratio)?;
        info!(
            "Training set and testing set are split ({} / {})",
            train_set.len(),
            test_set.len()
        );
        if test_set.is_empty() {
            warn!("Testing set is empty, test losses will be NaN");
        }

        info!("Creating {} influence predictor...", config.core);
        let learner = Learner::new(
            dataset.input_size(),
            output_classes,
            config.hidden_size,
            config.core,
            config.learning_rate,
            config.weight_decay,
            config.device_type,
        )?;

        Ok(Self {
            rng: Rng::with_seed(config.random_seed as u64),
            config,
            train_set,
            test_set,
            learner,
            history: LossHistory::default(),
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    /// Runs one pass over the shuffled training set and evaluates the testing set
    ///
    /// Returns the sample-weighted mean training loss and the test loss.
    pub fn train_epoch(&mut self) -> (f64, f64) {
        let mut epoch_loss = AvgTracker::default();

        for batch in self
            .train_set
            .batches(self.config.batch_size.get(), &mut self.rng)
        {
            let loss = self.learner.learn_batch(&batch);
            epoch_loss.add(loss, batch.len() as f64);
        }

        let test_loss = self.learner.evaluate(&self.test_set);
        self.history.push(epoch_loss.get(), test_loss);

        (epoch_loss.get(), test_loss)
    }

    /// Trains for the configured number of epochs and returns every epoch's losses
    pub fn train(&mut self) -> &LossHistory {
        info!("Training for {} epochs...", self.config.num_epochs);
        let mut interval_time = Instant::now();

        for epoch in 0..self.config.num_epochs {
            let (train_loss, test_loss) = self.train_epoch();

            if self.config.log_interval > 0 && epoch % self.config.log_interval == 0 {
                let mut report = Report::new(format!("Epoch {epoch}"));
                report["Training loss"] = train_loss;
                report["Test loss"] = test_loss;
                report["Seconds since last report"] = interval_time.elapsed().as_secs_f64();
                info!("\n{report}");

                interval_time = Instant::now();
            }
        }

        &self.history
    }
}
