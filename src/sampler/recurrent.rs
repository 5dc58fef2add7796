use super::{
    InfluenceSample, InfluenceSampler, check_heads, sample_categorical, uniform_distributions,
};
use crate::{
    error::{Error, Result},
    export::{self, ExportedModel},
    model::{CoreKind, check_dimensions},
};
use fastrand::Rng;
use std::{collections::HashMap, path::Path, time::Instant};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info, trace};

/// Input-to-hidden and hidden-to-hidden weights of one gate, transposed for `x @ w`
struct Gate {
    wx: Tensor,
    bx: Tensor,
    wh: Tensor,
    bh: Tensor,
}

impl Gate {
    fn input_part(&self, xs: &Tensor) -> Tensor {
        xs.matmul(&self.wx) + &self.bx
    }

    fn hidden_part(&self, hs: &Tensor) -> Tensor {
        hs.matmul(&self.wh) + &self.bh
    }
}

enum CellWeights {
    Gru { r: Gate, z: Gate, n: Gate },
    Rnn { h: Gate },
}

fn take(variables: &HashMap<String, Tensor>, name: &str) -> Result<Tensor> {
    variables
        .get(name)
        .map(|t| t.detach().copy())
        .ok_or_else(|| Error::MissingParameter(name.to_string()))
}

impl CellWeights {
    fn from_variables(core: CoreKind, variables: &HashMap<String, Tensor>) -> Result<Self> {
        let w_ih = take(variables, "gru.weight_ih_l0")?;
        let w_hh = take(variables, "gru.weight_hh_l0")?;
        let b_ih = take(variables, "gru.bias_ih_l0")?;
        let b_hh = take(variables, "gru.bias_hh_l0")?;

        Ok(match core {
            CoreKind::Gru => {
                // libtorch stacks the gates as reset, update, new
                let w_ih = w_ih.chunk(3, 0);
                let w_hh = w_hh.chunk(3, 0);
                let b_ih = b_ih.chunk(3, 0);
                let b_hh = b_hh.chunk(3, 0);
                let gate = |i: usize| Gate {
                    wx: w_ih[i].tr(),
                    bx: b_ih[i].shallow_clone(),
                    wh: w_hh[i].tr(),
                    bh: b_hh[i].shallow_clone(),
                };

                Self::Gru {
                    r: gate(0),
                    z: gate(1),
                    n: gate(2),
                }
            }
            CoreKind::Rnn => Self::Rnn {
                h: Gate {
                    wx: w_ih.tr(),
                    bx: b_ih,
                    wh: w_hh.tr(),
                    bh: b_hh,
                },
            },
        })
    }

    fn step(&self, xs: &Tensor, hs: &Tensor) -> Tensor {
        match self {
            Self::Gru { r, z, n } => {
                let r_t = (r.input_part(xs) + r.hidden_part(hs)).sigmoid();
                let z_t = (z.input_part(xs) + z.hidden_part(hs)).sigmoid();
                let n_t = (n.input_part(xs) + r_t * n.hidden_part(hs)).tanh();
                (z_t.neg() + 1.0) * n_t + z_t * hs
            }
            Self::Rnn { h } => (h.input_part(xs) + h.hidden_part(hs)).tanh(),
        }
    }
}

/// Samples influence values from an exported predictor
///
/// Single steps skip the module machinery: the cell is evaluated directly on the
/// extracted weight matrices, carrying the hidden state in a plain `Vec<f32>`.
pub struct RecurrentSampler {
    model: ExportedModel,
    cell: CellWeights,
    why: Tensor,
    by: Tensor,
    sources: Vec<String>,
    initial_distributions: Vec<Vec<f64>>,
    rng: Rng,
}

impl RecurrentSampler {
    pub fn new(model: ExportedModel, sources: Vec<String>, seed: u64) -> Result<Self> {
        let metadata = &model.metadata;
        let classes = &metadata.output_classes;
        check_dimensions(metadata.input_size, metadata.hidden_size, classes)?;
        check_heads(&sources, classes)?;

        let variables = model.store.variables();
        for (name, _) in variables.iter() {
            debug!("loaded: {name}");
        }

        let cell = CellWeights::from_variables(model.metadata.core, &variables)?;
        let why = take(&variables, "linear_layer.weight")?.tr();
        let by = take(&variables, "linear_layer.bias")?;
        let initial_distributions = uniform_distributions(classes);

        info!("{} influence sampler constructed", model.metadata.core);

        Ok(Self {
            model,
            cell,
            why,
            by,
            sources,
            initial_distributions,
            rng: Rng::with_seed(seed),
        })
    }

    /// Loads the export in `dir` onto the CPU
    pub fn from_dir<P: AsRef<Path>>(dir: P, sources: Vec<String>, seed: u64) -> Result<Self> {
        Self::new(export::load_model(dir, Device::Cpu)?, sources, seed)
    }

    /// Replaces the uniform distributions used before anything has been observed
    pub fn with_initial_distributions(mut self, distributions: Vec<Vec<f64>>) -> Result<Self> {
        let classes = &self.model.metadata.output_classes;
        if distributions.len() != classes.len() {
            return Err(Error::Length {
                name: "initial distributions",
                expected: classes.len(),
                actual: distributions.len(),
            });
        }

        for (index, (dist, &n)) in distributions.iter().zip(classes).enumerate() {
            if dist.len() != n as usize {
                return Err(Error::Length {
                    name: "initial distribution",
                    expected: n as usize,
                    actual: dist.len(),
                });
            }

            let total: f64 = dist.iter().sum();
            if dist.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
                return Err(Error::InvalidDistribution { index });
            }
        }

        self.initial_distributions = distributions;
        Ok(self)
    }

    fn input_size(&self) -> usize {
        self.model.metadata.input_size as usize
    }

    fn hidden_size(&self) -> usize {
        self.model.metadata.hidden_size as usize
    }

    fn sample_initial(&mut self) -> InfluenceSample {
        let Self {
            sources,
            initial_distributions,
            rng,
            ..
        } = self;

        sources
            .iter()
            .zip(initial_distributions.iter())
            .map(|(name, dist)| (name.clone(), sample_categorical(dist, rng)))
            .collect()
    }

    /// Per-head probabilities from the flat logits of a single step
    fn head_probs(&self, logits: &Tensor) -> Result<Vec<Vec<f64>>> {
        let mut offset = 0;
        let mut probs = Vec::with_capacity(self.sources.len());

        for &n in &self.model.metadata.output_classes {
            let head = logits
                .narrow(0, offset, n)
                .softmax(-1, Kind::Double)
                .contiguous();
            probs.push(Vec::<f64>::try_from(&head)?);
            offset += n;
        }

        Ok(probs)
    }

    /// Advances the cell by one step, returning the head probabilities and the new hidden state
    fn step_probs(&self, hidden: &[f32], inputs: &[i64]) -> Result<(Vec<Vec<f64>>, Vec<f32>)> {
        let _no_grad = tch::no_grad_guard();

        let xs = Tensor::from_slice(inputs)
            .to_kind(Kind::Float)
            .view([1, -1]);
        let hs = Tensor::from_slice(hidden).view([1, -1]);

        let new_hidden = self.cell.step(&xs, &hs);
        let logits = (new_hidden.matmul(&self.why) + &self.by).view([-1]);
        let probs = self.head_probs(&logits)?;

        Ok((probs, Vec::<f32>::try_from(&new_hidden.view([-1]))?))
    }

    fn draw(&mut self, probs: &[Vec<f64>]) -> InfluenceSample {
        let Self { sources, rng, .. } = self;

        sources
            .iter()
            .zip(probs)
            .map(|(name, dist)| (name.clone(), sample_categorical(dist, rng)))
            .collect()
    }

    fn check_len(&self, name: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(Error::Length {
                name,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl InfluenceSampler for RecurrentSampler {
    fn initial_state(&self) -> Vec<f32> {
        vec![0.0; self.hidden_size()]
    }

    fn one_step_sample(
        &mut self,
        hidden: &mut Vec<f32>,
        inputs: &[i64],
        initial: &mut bool,
    ) -> Result<InfluenceSample> {
        trace!("Influence sampler inputs: {inputs:?}");
        trace!("Influence sampler hidden state: {hidden:?}");

        let sample = if *initial {
            self.sample_initial()
        } else {
            self.check_len("inputs", self.input_size(), inputs.len())?;
            self.check_len("hidden state", self.hidden_size(), hidden.len())?;

            let begin = Instant::now();
            let (probs, new_hidden) = self.step_probs(hidden, inputs)?;
            *hidden = new_hidden;
            trace!("influence prediction took {:?}", begin.elapsed());
            self.draw(&probs)
        };

        *initial = false;
        trace!("Updated hidden state to: {hidden:?}");
        Ok(sample)
    }

    fn sample(&mut self, history: &[i64]) -> Result<InfluenceSample> {
        if history.is_empty() {
            return Ok(self.sample_initial());
        }

        let input_size = self.input_size();
        if history.len() % input_size != 0 {
            return Err(Error::Length {
                name: "history",
                expected: (history.len() / input_size + 1) * input_size,
                actual: history.len(),
            });
        }

        let _no_grad = tch::no_grad_guard();
        let inputs = Tensor::from_slice(history).view([1, -1, input_size as i64]);
        let logits = self.model.predictor.forward_logits(&inputs);
        let last = logits.select(0, 0).select(0, logits.size()[1] - 1);
        let probs = self.head_probs(&last)?;

        Ok(self.draw(&probs))
    }
}
