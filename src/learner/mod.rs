pub mod history;

use crate::{
    data::{Batch, SequenceDataset},
    error::Result,
    model::{CoreKind, RnnPredictor},
};
use tch::{
    Device, Kind, Tensor,
    nn::{self, OptimizerConfig},
};

/// Owns the predictor's parameters and the optimizer updating them
pub struct Learner {
    store: nn::VarStore,
    predictor: RnnPredictor,
    optimizer: nn::Optimizer,
    device: Device,
}

impl Learner {
    pub fn new(
        input_size: i64,
        output_classes: Vec<i64>,
        hidden_size: i64,
        core: CoreKind,
        learning_rate: f64,
        weight_decay: f64,
        device: Device,
    ) -> Result<Self> {
        let store = nn::VarStore::new(device);
        let predictor = RnnPredictor::new(
            store.root(),
            input_size,
            output_classes,
            hidden_size,
            core,
        )?;

        // weight decay is applied as an L2 term on the gradient
        let optimizer = nn::Adam {
            wd: weight_decay,
            ..Default::default()
        }
        .build(&store, learning_rate)?;

        Ok(Self {
            store,
            predictor,
            optimizer,
            device,
        })
    }

    pub fn predictor(&self) -> &RnnPredictor {
        &self.predictor
    }

    pub fn store(&self) -> &nn::VarStore {
        &self.store
    }

    /// Cross entropy of every output head over all steps of the batch, summed across heads
    ///
    /// The cross entropy is taken on the raw logits. Losses computed on already softmaxed
    /// probabilities are on a different scale and can't be compared with these.
    pub fn loss(&self, batch: &Batch) -> Tensor {
        let logits = self.predictor.forward_logits(&batch.inputs);
        let targets = batch.targets.to_device(self.device);

        let head_losses: Vec<Tensor> = self
            .predictor
            .head_logits(&logits)
            .iter()
            .zip(self.predictor.output_classes())
            .enumerate()
            .map(|(i, (head, &num_classes))| {
                let head_targets = targets.select(2, i as i64).reshape([-1]);
                head.reshape([-1, num_classes])
                    .cross_entropy_for_logits(&head_targets)
            })
            .collect();

        Tensor::stack(&head_losses, 0).sum(Kind::Float)
    }

    /// One gradient step on `batch`, returning the loss before the step
    pub fn learn_batch(&mut self, batch: &Batch) -> f64 {
        self.optimizer.zero_grad();
        let loss = self.loss(batch);
        loss.backward();
        self.optimizer.step();

        loss.double_value(&[])
    }

    /// Summed head losses over the whole set in a single batch, NaN when the set is empty
    pub fn evaluate(&self, data: &SequenceDataset) -> f64 {
        if data.is_empty() {
            return f64::NAN;
        }

        let _no_grad = tch::no_grad_guard();
        self.loss(&data.full_batch()).double_value(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each target is the input of the same step, so a recurrent model learns it quickly
    fn echo_dataset() -> SequenceDataset {
        let mut rng = fastrand::Rng::with_seed(11);
        let values: Vec<i64> = (0..32 * 6).map(|_| rng.i64(0..3)).collect();
        let inputs = Tensor::from_slice(&values).view([32, 6, 1]);
        let outputs = inputs.shallow_clone();
        SequenceDataset::new(inputs, outputs).unwrap()
    }

    fn learner(data: &SequenceDataset, core: CoreKind) -> Learner {
        Learner::new(
            data.input_size(),
            data.output_classes().unwrap(),
            8,
            core,
            1e-2,
            0.0,
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn untrained_loss_is_near_uniform() {
        tch::manual_seed(0);
        let data = echo_dataset();
        let learner = learner(&data, CoreKind::Gru);

        let loss = learner.evaluate(&data);
        let uniform = 3f64.ln();
        assert!((loss - uniform).abs() < 0.6, "loss {loss} vs ln(3) {uniform}");
    }

    #[test]
    fn loss_sums_heads() {
        tch::manual_seed(0);
        let mut rng = fastrand::Rng::with_seed(2);
        let first: Vec<i64> = (0..8 * 4).map(|_| rng.i64(0..3)).collect();
        let second: Vec<i64> = (0..8 * 4).map(|_| rng.i64(0..2)).collect();
        let inputs = Tensor::from_slice(&first).view([8, 4, 1]);
        let outputs = Tensor::stack(
            &[Tensor::from_slice(&first), Tensor::from_slice(&second)],
            1,
        )
        .view([8, 4, 2]);
        let data = SequenceDataset::new(inputs, outputs).unwrap();
        assert_eq!(data.output_classes().unwrap(), vec![3, 2]);

        let learner = learner(&data, CoreKind::Rnn);
        let _no_grad = tch::no_grad_guard();

        let probs = learner.predictor().forward(data.inputs());
        let expected: f64 = probs
            .iter()
            .enumerate()
            .map(|(i, head)| {
                let targets = data.outputs().select(2, i as i64).unsqueeze(-1);
                -head
                    .log()
                    .gather(2, &targets, false)
                    .mean(Kind::Float)
                    .double_value(&[])
            })
            .sum();

        assert!((learner.evaluate(&data) - expected).abs() < 1e-5);
    }

    #[test]
    fn training_reduces_loss() {
        tch::manual_seed(0);
        let data = echo_dataset();
        for core in [CoreKind::Gru, CoreKind::Rnn] {
            let mut learner = learner(&data, core);
            let mut rng = fastrand::Rng::with_seed(0);

            let before = learner.evaluate(&data);
            for _ in 0..60 {
                for batch in data.batches(8, &mut rng) {
                    learner.learn_batch(&batch);
                }
            }
            let after = learner.evaluate(&data);

            assert!(after < before * 0.5, "{core}: {before} -> {after}");
        }
    }

    #[test]
    fn empty_set_evaluates_to_nan() {
        let data = echo_dataset();
        let (_, test) = data.split(1.0).unwrap();
        assert!(learner(&data, CoreKind::Gru).evaluate(&test).is_nan());
    }
}
