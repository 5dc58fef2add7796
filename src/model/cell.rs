use tch::{
    Device, Kind, Tensor,
    nn::{self, GRUState, RNN, RNNConfig},
};

/// Hidden state of the plain tanh core, laid out as `[1, batch, hidden]` like the GRU's
#[derive(Debug)]
pub struct RnnState(pub Tensor);

/// Single layer Elman network, `h' = tanh(W_ih x + b_ih + W_hh h + b_hh)`
///
/// Parameters are named the way libtorch names them so that exported weights
/// read the same for both core kinds.
#[derive(Debug)]
pub struct TanhRnn {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden_size: i64,
    device: Device,
}

impl TanhRnn {
    pub fn new(path: nn::Path, input_size: i64, hidden_size: i64) -> Self {
        let stdv = 1.0 / (hidden_size as f64).sqrt();
        let init = nn::Init::Uniform {
            lo: -stdv,
            up: stdv,
        };

        Self {
            w_ih: path.var("weight_ih_l0", &[hidden_size, input_size], init),
            w_hh: path.var("weight_hh_l0", &[hidden_size, hidden_size], init),
            b_ih: path.var("bias_ih_l0", &[hidden_size], init),
            b_hh: path.var("bias_hh_l0", &[hidden_size], init),
            hidden_size,
            device: path.device(),
        }
    }

    fn cell(&self, xs: &Tensor, hs: &Tensor) -> Tensor {
        (xs.matmul(&self.w_ih.tr()) + &self.b_ih + hs.matmul(&self.w_hh.tr()) + &self.b_hh).tanh()
    }
}

impl RNN for TanhRnn {
    type State = RnnState;

    fn zero_state(&self, batch_dim: i64) -> RnnState {
        RnnState(Tensor::zeros(
            [1, batch_dim, self.hidden_size],
            (Kind::Float, self.device),
        ))
    }

    fn step(&self, input: &Tensor, state: &RnnState) -> RnnState {
        let (_, state) = self.seq_init(&input.unsqueeze(1), state);
        state
    }

    fn seq_init(&self, input: &Tensor, state: &RnnState) -> (Tensor, RnnState) {
        let steps = input.size()[1];
        let mut hs = state.0.squeeze_dim(0);
        let mut outputs = Vec::with_capacity(steps as usize);

        for t in 0..steps {
            hs = self.cell(&input.select(1, t), &hs);
            outputs.push(hs.shallow_clone());
        }

        (Tensor::stack(&outputs, 1), RnnState(hs.unsqueeze(0)))
    }
}

/// The recurrent part of the predictor, either libtorch's fused GRU or [`TanhRnn`]
pub enum RecurrentCore {
    Gru(nn::GRU),
    Rnn(TanhRnn),
}

impl RecurrentCore {
    pub fn gru(path: nn::Path, input_size: i64, hidden_size: i64) -> Self {
        // batch_first, one layer, with biases
        Self::Gru(nn::gru(path, input_size, hidden_size, RNNConfig::default()))
    }

    pub fn rnn(path: nn::Path, input_size: i64, hidden_size: i64) -> Self {
        Self::Rnn(TanhRnn::new(path, input_size, hidden_size))
    }

    /// Runs `input` (`[batch, steps, features]`) from `hidden` (`[1, batch, hidden]`),
    /// returning every step's output and the final hidden state
    pub fn seq_init(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        match self {
            Self::Gru(gru) => {
                let (output, GRUState(state)) =
                    gru.seq_init(input, &GRUState(hidden.shallow_clone()));
                (output, state)
            }
            Self::Rnn(rnn) => {
                let (output, RnnState(state)) =
                    rnn.seq_init(input, &RnnState(hidden.shallow_clone()));
                (output, state)
            }
        }
    }
}
