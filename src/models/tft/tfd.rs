use burn::config::Config;
use burn::module::Module;
use burn::nn::attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig};
use burn::tensor::{backend::Backend, Bool, Tensor};
use tracing::trace;

use crate::modules::time_distributed::{TimeDistributed, TimeDistributedConfig};
use crate::utils::causal_mask;

use super::grn::{GatedResidualNetwork, GatedResidualNetworkConfig};

/// Static enrichment followed by causally masked attention over the whole
/// encoder plus decoder timeline.
///
/// Queries and keys come from the enriched sequence, values from the raw
/// recurrent output.
#[derive(Module, Debug)]
pub struct TemporalFusionDecoder<B: Backend> {
    encode_length: usize,
    enrich: GatedResidualNetwork<B>,
    attention: MultiHeadAttention<B>,
    ff_net_grn: Option<GatedResidualNetwork<B>>,
    ff_steps: TimeDistributed,
}

impl<B: Backend> TemporalFusionDecoder<B> {
    /// `x` is the time-major recurrent output `[T, batch, hidden]`, `statics`
    /// the static vector `[batch, d_static]`.
    ///
    /// Returns the attended decode window `[T - encode_length, batch, hidden]`
    /// and head-averaged attention weights `[batch, T, T]`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        statics: Tensor<B, 2>,
        device: &B::Device,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [seq_len, batch, d_hidden] = x.dims();
        assert!(
            seq_len > self.encode_length,
            "timeline of {} steps has no decode window after {} encoder steps",
            seq_len,
            self.encode_length
        );

        let expanded_static: Tensor<B, 3> =
            Tensor::cat(vec![statics.unsqueeze_dim(0); seq_len], 0);
        let enriched = self.enrich.forward(x.clone(), Some(expanded_static));

        let mask = self.attention_mask(seq_len, batch, device);

        let query = enriched.swap_dims(0, 1);
        let value = x.swap_dims(0, 1);
        let att_input = MhaInput::new(query.clone(), query, value).mask_attn(mask);
        let mha_output = self.attention.forward(att_input);

        let weights = mha_output.weights.mean_dim(1).squeeze::<3>(1);
        let attended = mha_output
            .context
            .swap_dims(0, 1)
            .slice([self.encode_length..seq_len, 0..batch, 0..d_hidden]);
        trace!(dims = ?attended.dims(), "attended decode window");

        let attended = match &self.ff_net_grn {
            Some(grn) => self
                .ff_steps
                .forward(attended, |rows| grn.forward(rows, None)),
            None => attended,
        };

        (attended, weights)
    }

    fn attention_mask(
        &self,
        seq_len: usize,
        batch: usize,
        device: &B::Device,
    ) -> Tensor<B, 3, Bool> {
        let future = causal_mask::<B>(seq_len, device)
            .equal_elem(f32::NEG_INFINITY)
            .unsqueeze_dim::<3>(0);

        Tensor::cat(vec![future; batch], 0)
    }
}

#[derive(Config, Debug)]
pub struct TemporalFusionDecoderConfig {
    encode_length: usize,
    d_hidden: usize,
    d_static: usize,
    num_heads: usize,

    #[config(default = 0.0)]
    dropout: f64,

    #[config(default = false)]
    position_wise_feed_forward: bool,
}

impl TemporalFusionDecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TemporalFusionDecoder<B> {
        let enrich = GatedResidualNetworkConfig::new(self.d_hidden)
            .with_d_context(Some(self.d_static))
            .with_dropout(self.dropout)
            .init(device);

        let attention = MultiHeadAttentionConfig::new(self.d_hidden, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);

        let ff_net_grn = self.position_wise_feed_forward.then(|| {
            GatedResidualNetworkConfig::new(self.d_hidden)
                .with_dropout(self.dropout)
                .init(device)
        });

        TemporalFusionDecoder {
            encode_length: self.encode_length,
            enrich,
            attention,
            ff_net_grn,
            ff_steps: TimeDistributedConfig::new().init(),
        }
    }
}
