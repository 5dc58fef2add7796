use crate::error::{Error, Result};
use fastrand::Rng;
use std::path::{Path, PathBuf};
use tch::{Kind, Tensor};
use tracing::debug;

pub const INPUTS_STEM: &str = "inputs";
pub const OUTPUTS_STEM: &str = "outputs";

/// A set of sequences to learn from
pub struct Batch {
    /// `[batch, steps, input_size]`, float
    pub inputs: Tensor,
    /// `[batch, steps, output_size]`, class indices
    pub targets: Tensor,
}

impl Batch {
    pub fn len(&self) -> i64 {
        self.inputs.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paired sequences of observed inputs and the influence values that followed them
pub struct SequenceDataset {
    inputs: Tensor,
    outputs: Tensor,
}

impl SequenceDataset {
    /// Validates shapes and converts to float inputs / int64 targets
    pub fn new(inputs: Tensor, outputs: Tensor) -> Result<Self> {
        let in_size = inputs.size();
        let out_size = outputs.size();

        if in_size.len() != 3 || in_size[0] == 0 || in_size[1] == 0 {
            return Err(Error::Shape {
                name: "inputs",
                expected: "[sequences > 0, steps > 0, features]",
                actual: in_size,
            });
        }

        if out_size.len() != 3 || out_size[..2] != in_size[..2] || out_size[2] == 0 {
            return Err(Error::Shape {
                name: "outputs",
                expected: "[sequences, steps, features > 0] matching the inputs",
                actual: out_size,
            });
        }

        Ok(Self {
            inputs: inputs.to_kind(Kind::Float),
            outputs: outputs.to_kind(Kind::Int64),
        })
    }

    /// Reads `inputs` and `outputs` from `dir`, preferring libtorch archives (`.pt`)
    /// and falling back to numpy arrays (`.npy`)
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let inputs = load_tensor(dir, INPUTS_STEM)?;
        let outputs = load_tensor(dir, OUTPUTS_STEM)?;

        debug!("inputs: {:?}", inputs.size());
        debug!("outputs: {:?}", outputs.size());

        Self::new(inputs, outputs)
    }

    pub fn len(&self) -> i64 {
        self.inputs.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn input_size(&self) -> i64 {
        self.inputs.size()[2]
    }

    pub fn output_size(&self) -> i64 {
        self.outputs.size()[2]
    }

    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    pub fn outputs(&self) -> &Tensor {
        &self.outputs
    }

    /// Number of classes of every output feature, `max - min + 1` over the whole set
    ///
    /// Targets are used as class indices as-is, so each must fall in `[0, classes)`.
    pub fn output_classes(&self) -> Result<Vec<i64>> {
        (0..self.output_size())
            .map(|feature| {
                let column = self.outputs.select(2, feature);
                let max = column.max().int64_value(&[]);
                let min = column.min().int64_value(&[]);
                let classes = max - min + 1;

                let bad_value = if min < 0 {
                    Some(min)
                } else if max >= classes {
                    Some(max)
                } else {
                    None
                };

                match bad_value {
                    Some(value) => Err(Error::TargetOutOfRange {
                        feature: feature as usize,
                        value,
                        classes,
                    }),
                    None => Ok(classes),
                }
            })
            .collect()
    }

    /// Splits off the first `floor(len * ratio)` sequences for training; the rest is for testing
    pub fn split(&self, ratio: f64) -> Result<(SequenceDataset, SequenceDataset)> {
        let total = self.len();
        let train_len = ((total as f64 * ratio) as i64).clamp(0, total);
        if train_len == 0 {
            return Err(Error::EmptyTrainingSet { total, ratio });
        }

        let test_len = total - train_len;
        let train = Self {
            inputs: self.inputs.narrow(0, 0, train_len),
            outputs: self.outputs.narrow(0, 0, train_len),
        };
        let test = Self {
            inputs: self.inputs.narrow(0, train_len, test_len),
            outputs: self.outputs.narrow(0, train_len, test_len),
        };

        Ok((train, test))
    }

    fn select(&self, indices: &[i64]) -> Batch {
        let t_indices = Tensor::from_slice(indices);

        Batch {
            inputs: self.inputs.index_select(0, &t_indices),
            targets: self.outputs.index_select(0, &t_indices),
        }
    }

    /// Every sequence, reshuffled into batches of `batch_size`; the last batch may be short
    pub fn batches(&self, batch_size: usize, rng: &mut Rng) -> Vec<Batch> {
        let mut indices: Vec<i64> = (0..self.len()).collect();
        rng.shuffle(&mut indices);

        indices
            .chunks(batch_size)
            .map(|chunk| self.select(chunk))
            .collect()
    }

    /// The whole set as one batch
    pub fn full_batch(&self) -> Batch {
        Batch {
            inputs: self.inputs.shallow_clone(),
            targets: self.outputs.shallow_clone(),
        }
    }
}

fn load_tensor(dir: &Path, stem: &str) -> Result<Tensor> {
    let pt_path = data_file(dir, stem, "pt");
    if pt_path.is_file() {
        return Ok(Tensor::load(&pt_path)?);
    }

    let npy_path = data_file(dir, stem, "npy");
    if npy_path.is_file() {
        return Ok(Tensor::read_npy(&npy_path)?);
    }

    Err(Error::MissingData(pt_path))
}

/// Whether `dir` holds a loadable dataset
pub fn data_exists<P: AsRef<Path>>(dir: P) -> bool {
    let dir = dir.as_ref();
    [INPUTS_STEM, OUTPUTS_STEM].iter().all(|stem| {
        ["pt", "npy"]
            .iter()
            .any(|ext| data_file(dir, stem, ext).is_file())
    })
}

fn data_file(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{stem}.{ext}"))
}
