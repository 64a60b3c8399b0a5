use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Lstm, LstmConfig, LstmState};
use burn::tensor::{backend::Backend, Tensor};

/// Recurrent memory of every layer, each tensor shaped `[layers, batch, hidden]`.
#[derive(Clone, Debug)]
pub struct HiddenState<B: Backend> {
    pub hidden: Tensor<B, 3>,
    pub cell: Tensor<B, 3>,
}

impl<B: Backend> HiddenState<B> {
    pub fn new(hidden: Tensor<B, 3>, cell: Tensor<B, 3>) -> Self {
        assert_eq!(
            hidden.dims(),
            cell.dims(),
            "hidden and cell state must share a shape"
        );
        Self { hidden, cell }
    }

    pub fn zeros(layers: usize, batch: usize, d_hidden: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([layers, batch, d_hidden], device),
            cell: Tensor::zeros([layers, batch, d_hidden], device),
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.hidden.dims()
    }

    fn layer(&self, index: usize) -> LstmState<B, 2> {
        let [_, batch, d_hidden] = self.dims();
        let pick = |t: &Tensor<B, 3>| {
            t.clone()
                .slice([index..index + 1, 0..batch, 0..d_hidden])
                .squeeze::<2>(0)
        };

        LstmState::new(pick(&self.cell), pick(&self.hidden))
    }

    fn from_layers(layers: Vec<LstmState<B, 2>>) -> Self {
        let (hidden, cell): (Vec<_>, Vec<_>) = layers
            .into_iter()
            .map(|state| (state.hidden, state.cell))
            .unzip();

        Self {
            hidden: Tensor::stack(hidden, 0),
            cell: Tensor::stack(cell, 0),
        }
    }
}

/// `num_layers` LSTMs run one after the other over time-major input
/// `[time, batch, features]`, with dropout between layers but not after the
/// last one.
#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    layers: Vec<Lstm<B>>,
    dropout: Dropout,
    d_hidden: usize,
}

impl<B: Backend> StackedLstm<B> {
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Option<HiddenState<B>>,
    ) -> (Tensor<B, 3>, HiddenState<B>) {
        let [_, batch, _] = x.dims();
        let state = match state {
            Some(state) => state,
            None => HiddenState::zeros(self.num_layers(), batch, self.d_hidden, &x.device()),
        };
        assert_eq!(
            state.dims(),
            [self.num_layers(), batch, self.d_hidden],
            "recurrent state does not match [layers, batch, hidden]"
        );

        let last = self.layers.len() - 1;
        let mut output = x.swap_dims(0, 1);
        let mut finals = Vec::with_capacity(self.layers.len());

        for (index, lstm) in self.layers.iter().enumerate() {
            let (out, layer_state) = lstm.forward(output, Some(state.layer(index)));
            finals.push(layer_state);

            output = if index < last {
                self.dropout.forward(out)
            } else {
                out
            };
        }

        (output.swap_dims(0, 1), HiddenState::from_layers(finals))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[derive(Config, Debug)]
pub struct StackedLstmConfig {
    d_input: usize,
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl StackedLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> StackedLstm<B> {
        assert!(self.num_layers > 0, "a stacked LSTM needs at least one layer");

        let layers = (0..self.num_layers)
            .map(|index| {
                let d_input = if index == 0 {
                    self.d_input
                } else {
                    self.d_hidden
                };
                LstmConfig::new(d_input, self.d_hidden, true).init(device)
            })
            .collect();

        StackedLstm {
            layers,
            dropout: DropoutConfig::new(self.dropout).init(),
            d_hidden: self.d_hidden,
        }
    }
}
