use super::{InfluenceSample, InfluenceSampler, check_heads};
use crate::error::Result;
use fastrand::Rng;
use tracing::info;

/// Baseline that ignores its inputs and picks every influence value uniformly
pub struct RandomSampler {
    sources: Vec<String>,
    output_classes: Vec<i64>,
    rng: Rng,
}

impl RandomSampler {
    pub fn new(sources: Vec<String>, output_classes: Vec<i64>, seed: u64) -> Result<Self> {
        check_heads(&sources, &output_classes)?;
        info!("Random influence sampler constructed");

        Ok(Self {
            sources,
            output_classes,
            rng: Rng::with_seed(seed),
        })
    }

    fn draw(&mut self) -> InfluenceSample {
        let Self {
            sources,
            output_classes,
            rng,
        } = self;

        sources
            .iter()
            .zip(output_classes.iter())
            .map(|(name, &n)| (name.clone(), rng.i64(0..n)))
            .collect()
    }
}

impl InfluenceSampler for RandomSampler {
    fn initial_state(&self) -> Vec<f32> {
        Vec::new()
    }

    fn one_step_sample(
        &mut self,
        _hidden: &mut Vec<f32>,
        _inputs: &[i64],
        _initial: &mut bool,
    ) -> Result<InfluenceSample> {
        Ok(self.draw())
    }

    fn sample(&mut self, _history: &[i64]) -> Result<InfluenceSample> {
        Ok(self.draw())
    }
}
