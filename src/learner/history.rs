use crate::error::Result;
use std::{fs, path::Path};
use tch::Tensor;

pub const TRAINING_LOSSES_FILE: &str = "training_losses.npy";
pub const TESTING_LOSSES_FILE: &str = "testing_losses.npy";

/// Per-epoch loss curves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub training: Vec<f64>,
    pub testing: Vec<f64>,
}

impl LossHistory {
    pub fn push(&mut self, training_loss: f64, testing_loss: f64) {
        self.training.push(training_loss);
        self.testing.push(testing_loss);
    }

    pub fn len(&self) -> usize {
        self.training.len()
    }

    pub fn is_empty(&self) -> bool {
        self.training.is_empty()
    }

    /// Writes both curves as numpy arrays into `dir`, creating it if needed
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| crate::Error::io(dir, e))?;

        Tensor::from_slice(&self.training).write_npy(dir.join(TRAINING_LOSSES_FILE))?;
        Tensor::from_slice(&self.testing).write_npy(dir.join(TESTING_LOSSES_FILE))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let training = Tensor::read_npy(dir.join(TRAINING_LOSSES_FILE))?;
        let testing = Tensor::read_npy(dir.join(TESTING_LOSSES_FILE))?;

        Ok(Self {
            training: Vec::<f64>::try_from(&training)?,
            testing: Vec::<f64>::try_from(&testing)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_numpy_curves() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");

        let mut history = LossHistory::default();
        history.push(2.5, 2.75);
        history.push(1.25, f64::NAN);
        history.save(&out).unwrap();

        assert!(out.join(TRAINING_LOSSES_FILE).is_file());
        let loaded = LossHistory::load(&out).unwrap();
        assert_eq!(loaded.training, vec![2.5, 1.25]);
        assert_eq!(loaded.testing[0], 2.75);
        assert!(loaded.testing[1].is_nan());
    }
}
