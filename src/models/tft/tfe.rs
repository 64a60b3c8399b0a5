use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use tracing::trace;

use super::lstm::{HiddenState, StackedLstm, StackedLstmConfig};

/// Recurrent core: an encoder LSTM over the historical window and a decoder
/// LSTM over the forecast horizon seeded with the encoder's final state.
/// Tensors are time-major, `[time, batch, channels]`.
#[derive(Module, Debug)]
pub struct TemporalFusionEncoder<B: Backend> {
    encoder_lstm: StackedLstm<B>,
    decoder_lstm: StackedLstm<B>,
}

impl<B: Backend> TemporalFusionEncoder<B> {
    pub fn encode(
        &self,
        x: Tensor<B, 3>,
        state: Option<HiddenState<B>>,
    ) -> (Tensor<B, 3>, HiddenState<B>) {
        self.encoder_lstm.forward(x, state)
    }

    pub fn decode(
        &self,
        x: Tensor<B, 3>,
        state: Option<HiddenState<B>>,
    ) -> (Tensor<B, 3>, HiddenState<B>) {
        self.decoder_lstm.forward(x, state)
    }

    /// Returns `(encoder_output, decoder_output)`.
    pub fn forward(
        &self,
        ctx_input: Tensor<B, 3>,
        tgt_input: Tensor<B, 3>,
        state: Option<HiddenState<B>>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let (ctx_encodings, state) = self.encode(ctx_input, state);
        trace!(dims = ?ctx_encodings.dims(), "encoded historical window");

        let (tgt_encodings, _) = self.decode(tgt_input, Some(state));
        trace!(dims = ?tgt_encodings.dims(), "decoded forecast window");

        (ctx_encodings, tgt_encodings)
    }
}

#[derive(Config, Debug)]
pub struct TemporalFusionEncoderConfig {
    d_input: usize,
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl TemporalFusionEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TemporalFusionEncoder<B> {
        let lstm = StackedLstmConfig::new(self.d_input, self.d_hidden)
            .with_num_layers(self.num_layers)
            .with_dropout(self.dropout);

        TemporalFusionEncoder {
            encoder_lstm: lstm.init(device),
            decoder_lstm: lstm.init(device),
        }
    }
}
