pub mod cell;

use crate::error::{Error, Result};
use cell::RecurrentCore;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tch::{
    Device, Kind, Tensor,
    nn::{self, LinearConfig, Module},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum CoreKind {
    #[default]
    #[serde(rename = "GRU")]
    Gru,
    #[serde(rename = "RNN")]
    Rnn,
}

impl FromStr for CoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GRU" => Ok(Self::Gru),
            "RNN" => Ok(Self::Rnn),
            _ => Err(Error::UnknownCore(s.to_string())),
        }
    }
}

impl TryFrom<String> for CoreKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Gru => write!(f, "GRU"),
            Self::Rnn => write!(f, "RNN"),
        }
    }
}

/// Rejects sizes no predictor can be built with
pub fn check_dimensions(input_size: i64, hidden_size: i64, output_classes: &[i64]) -> Result<()> {
    if input_size <= 0 {
        return Err(Error::InvalidModel(format!("input size {input_size}")));
    }
    if hidden_size <= 0 {
        return Err(Error::InvalidModel(format!("hidden size {hidden_size}")));
    }
    if output_classes.is_empty() {
        return Err(Error::InvalidModel("no output heads".to_string()));
    }
    if let Some(n) = output_classes.iter().find(|&&n| n <= 0) {
        return Err(Error::InvalidModel(format!("output head with {n} classes")));
    }
    Ok(())
}

/// Recurrent network predicting one categorical distribution per output feature
///
/// The core's hidden state feeds a single linear layer whose
/// `sum(output_classes)` logits are cut into consecutive slices, one per head,
/// each normalized with its own softmax.
pub struct RnnPredictor {
    core: RecurrentCore,
    linear_layer: nn::Linear,
    core_kind: CoreKind,
    input_size: i64,
    hidden_size: i64,
    output_classes: Vec<i64>,
    device: Device,
}

impl RnnPredictor {
    pub fn new(
        path: nn::Path,
        input_size: i64,
        output_classes: Vec<i64>,
        hidden_size: i64,
        core_kind: CoreKind,
    ) -> Result<Self> {
        check_dimensions(input_size, hidden_size, &output_classes)?;

        let core = match core_kind {
            CoreKind::Gru => RecurrentCore::gru(&path / "gru", input_size, hidden_size),
            CoreKind::Rnn => RecurrentCore::rnn(&path / "gru", input_size, hidden_size),
        };

        let output_layer_size = output_classes.iter().sum();
        let linear_layer = nn::linear(
            &path / "linear_layer",
            hidden_size,
            output_layer_size,
            LinearConfig::default(),
        );

        Ok(Self {
            core,
            linear_layer,
            core_kind,
            input_size,
            hidden_size,
            output_classes,
            device: path.device(),
        })
    }

    pub fn core_kind(&self) -> CoreKind {
        self.core_kind
    }

    pub fn input_size(&self) -> i64 {
        self.input_size
    }

    pub fn hidden_size(&self) -> i64 {
        self.hidden_size
    }

    pub fn output_classes(&self) -> &[i64] {
        &self.output_classes
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Zeroed hidden state for `batch` sequences
    pub fn initial_state(&self, batch: i64) -> Tensor {
        Tensor::zeros([1, batch, self.hidden_size], (Kind::Float, self.device))
    }

    /// Raw logits of shape `[batch, steps, sum(output_classes)]` plus the final hidden state
    pub fn recurrent_logits(&self, hidden: &Tensor, inputs: &Tensor) -> (Tensor, Tensor) {
        let inputs = inputs.to_device(self.device).to_kind(Kind::Float);
        let (outputs, hidden) = self
            .core
            .seq_init(&inputs, &hidden.to_device(self.device));
        (self.linear_layer.forward(&outputs), hidden)
    }

    pub fn forward_logits(&self, inputs: &Tensor) -> Tensor {
        let hidden = self.initial_state(inputs.size()[0]);
        self.recurrent_logits(&hidden, inputs).0
    }

    /// Splits the last dimension of `logits` into one slice per output head
    pub fn head_logits(&self, logits: &Tensor) -> Vec<Tensor> {
        let mut offset = 0;
        self.output_classes
            .iter()
            .map(|&num_classes| {
                let head = logits.narrow(-1, offset, num_classes);
                offset += num_classes;
                head
            })
            .collect()
    }

    fn head_probs(&self, logits: &Tensor) -> Vec<Tensor> {
        self.head_logits(logits)
            .into_iter()
            .map(|head| head.softmax(-1, Kind::Float))
            .collect()
    }

    /// Per-head probabilities `[batch, steps, n_k]` for whole sequences, starting from zero
    pub fn forward(&self, inputs: &Tensor) -> Vec<Tensor> {
        self.head_probs(&self.forward_logits(inputs))
    }

    /// Same as [`Self::forward`] but continues from `hidden` and hands back the new state
    ///
    /// This is the entry point for step-by-step prediction inside a simulation.
    pub fn recurrent_forward(&self, hidden: &Tensor, inputs: &Tensor) -> (Vec<Tensor>, Tensor) {
        let (logits, hidden) = self.recurrent_logits(hidden, inputs);
        (self.head_probs(&logits), hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    fn predictor(vs: &nn::VarStore, core: CoreKind) -> RnnPredictor {
        RnnPredictor::new(vs.root(), 4, vec![2, 3, 1], 6, core).unwrap()
    }

    #[test]
    fn core_kind_parses_config_strings() {
        assert_eq!("GRU".parse::<CoreKind>().unwrap(), CoreKind::Gru);
        assert_eq!("rnn".parse::<CoreKind>().unwrap(), CoreKind::Rnn);
        assert!("LSTM".parse::<CoreKind>().is_err());
        assert_eq!(CoreKind::Rnn.to_string(), "RNN");
    }

    #[test]
    fn core_kind_deserializes_any_case() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            core: CoreKind,
        }

        let parsed: Wrapper = toml::from_str(r#"core = "gru""#).unwrap();
        assert_eq!(parsed.core, CoreKind::Gru);
        let parsed: Wrapper = toml::from_str(r#"core = "Rnn""#).unwrap();
        assert_eq!(parsed.core, CoreKind::Rnn);
        assert!(toml::from_str::<Wrapper>(r#"core = "LSTM""#).is_err());

        let written = toml::to_string(&Wrapper {
            core: CoreKind::Rnn,
        })
        .unwrap();
        assert_eq!(written.trim(), r#"core = "RNN""#);
    }

    #[test]
    fn rejects_degenerate_dimensions() {
        let vs = nn::VarStore::new(Device::Cpu);
        for (input_size, classes, hidden_size) in [
            (4, vec![], 6),
            (4, vec![2, 0], 6),
            (4, vec![2, -1], 6),
            (0, vec![2], 6),
            (4, vec![2], 0),
            (4, vec![2], -3),
        ] {
            assert!(matches!(
                RnnPredictor::new(vs.root(), input_size, classes, hidden_size, CoreKind::Gru),
                Err(Error::InvalidModel(_))
            ));
        }
        assert!(vs.variables().is_empty());
    }

    #[test]
    fn heads_are_normalized_distributions() {
        tch::manual_seed(1);
        for core in [CoreKind::Gru, CoreKind::Rnn] {
            let vs = nn::VarStore::new(Device::Cpu);
            let predictor = predictor(&vs, core);

            let inputs = Tensor::randn([5, 7, 4], FLOAT_CPU);
            let probs = predictor.forward(&inputs);

            assert_eq!(probs.len(), 3);
            for (head, &num_classes) in probs.iter().zip(predictor.output_classes()) {
                assert_eq!(head.size(), vec![5, 7, num_classes]);
                let sums = head.sum_dim_intlist([-1i64].as_slice(), false, Kind::Float);
                assert!(sums.allclose(&Tensor::ones([5, 7], FLOAT_CPU), 1e-5, 1e-6, false));
            }
        }
    }

    #[test]
    fn head_slices_follow_class_offsets() {
        let vs = nn::VarStore::new(Device::Cpu);
        let predictor = predictor(&vs, CoreKind::Gru);

        let logits = Tensor::arange(6, (Kind::Float, Device::Cpu)).view([1, 1, 6]);
        let heads = predictor.head_logits(&logits);

        let firsts: Vec<f64> = heads.iter().map(|h| h.double_value(&[0, 0, 0])).collect();
        assert_eq!(firsts, vec![0.0, 2.0, 5.0]);
    }

    #[test]
    fn stepping_matches_full_sequence() {
        tch::manual_seed(3);
        for core in [CoreKind::Gru, CoreKind::Rnn] {
            let vs = nn::VarStore::new(Device::Cpu);
            let predictor = predictor(&vs, core);
            let _no_grad = tch::no_grad_guard();

            let inputs = Tensor::randn([2, 5, 4], FLOAT_CPU);
            let full = predictor.forward(&inputs);

            let mut hidden = predictor.initial_state(2);
            for t in 0..5 {
                let step_inputs = inputs.narrow(1, t, 1);
                let (probs, next) = predictor.recurrent_forward(&hidden, &step_inputs);
                for (step, whole) in probs.iter().zip(&full) {
                    assert!(step.allclose(&whole.narrow(1, t, 1), 1e-5, 1e-6, false));
                }
                hidden = next;
            }
            assert_eq!(hidden.size(), vec![1, 2, 6]);
        }
    }

    #[test]
    fn parameters_use_exported_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _predictor = predictor(&vs, CoreKind::Rnn);

        let variables = vs.variables();
        assert_eq!(variables["linear_layer.weight"].size(), vec![6, 6]);
        assert_eq!(variables["linear_layer.bias"].size(), vec![6]);
        assert_eq!(variables["gru.weight_ih_l0"].size(), vec![6, 4]);
    }
}
