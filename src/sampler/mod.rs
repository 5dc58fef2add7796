mod random;
mod recurrent;

pub use random::RandomSampler;
pub use recurrent::RecurrentSampler;

use crate::error::{Error, Result};
use ahash::AHashMap;
use fastrand::Rng;

/// Sampled value of every influence source, keyed by variable name
pub type InfluenceSample = AHashMap<String, i64>;

/// Draws influence values for a simulator stepping through an episode
pub trait InfluenceSampler {
    /// Hidden state to start an episode with
    fn initial_state(&self) -> Vec<f32>;

    /// Samples the influence after observing `inputs`, advancing `hidden` in place
    ///
    /// When `initial` is set the sample comes from the initial distribution and the
    /// hidden state is left alone. `initial` is cleared afterwards.
    fn one_step_sample(
        &mut self,
        hidden: &mut Vec<f32>,
        inputs: &[i64],
        initial: &mut bool,
    ) -> Result<InfluenceSample>;

    /// Samples the influence following a whole history of inputs, flattened step after step
    fn sample(&mut self, history: &[i64]) -> Result<InfluenceSample>;
}

/// Index drawn with probability proportional to its weight
pub(crate) fn sample_categorical(weights: &[f64], rng: &mut Rng) -> i64 {
    let total: f64 = weights.iter().sum();
    let mut remaining = rng.f64() * total;

    for (i, weight) in weights.iter().enumerate() {
        if remaining < *weight {
            return i as i64;
        }
        remaining -= weight;
    }

    // rounding can leave a sliver past the last bucket
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(0) as i64
}

/// Uniform distribution for every head
pub fn uniform_distributions(output_classes: &[i64]) -> Vec<Vec<f64>> {
    output_classes
        .iter()
        .map(|&n| vec![1.0 / n as f64; n as usize])
        .collect()
}

pub(crate) fn check_heads(sources: &[String], output_classes: &[i64]) -> Result<()> {
    if sources.len() != output_classes.len() {
        return Err(Error::Length {
            name: "influence sources",
            expected: output_classes.len(),
            actual: sources.len(),
        });
    }
    Ok(())
}
