use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Int, Tensor};
use serde::{Deserialize, Serialize};

use crate::modules::time_distributed::{TimeDistributed, TimeDistributedConfig};

/// Static codes come from `identifier`, the other two from `inputs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Static,
    Categorical,
    Real,
}

#[derive(Module, Debug)]
pub enum FeatureLayer<B: Backend> {
    Static(Embedding<B>),
    Categorical(Embedding<B>),
    Real(Linear<B>),
}

/// Embeds one input column to `d_embedding` channels per time step.
#[derive(Module, Debug)]
pub struct FeatureEmbedder<B: Backend> {
    column: usize,
    layer: FeatureLayer<B>,
    steps: TimeDistributed,
}

impl<B: Backend> FeatureEmbedder<B> {
    /// Input `[batch, time, 1]` holding the raw column, output
    /// `[batch, time, d_embedding]`. Category codes stored as floats are
    /// truncated to integers.
    pub fn forward(&self, column: Tensor<B, 3>) -> Tensor<B, 3> {
        match &self.layer {
            FeatureLayer::Real(projection) => {
                self.steps.forward(column, |rows| projection.forward(rows))
            }
            _ => self.forward_codes(column.int()),
        }
    }

    /// Same as [`Self::forward`] for integer codes `[batch, time, 1]`,
    /// looked up without passing through floats.
    pub fn forward_codes(&self, codes: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        match &self.layer {
            FeatureLayer::Static(table) | FeatureLayer::Categorical(table) => {
                let [batch, time, _] = codes.dims();
                table.forward(codes.reshape([batch, time]))
            }
            FeatureLayer::Real(_) => self.forward(codes.float()),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self.layer {
            FeatureLayer::Static(_) => FeatureKind::Static,
            FeatureLayer::Categorical(_) => FeatureKind::Categorical,
            FeatureLayer::Real(_) => FeatureKind::Real,
        }
    }

    pub fn column(&self) -> usize {
        self.column
    }
}

#[derive(Config, Debug)]
pub struct FeatureEmbedderConfig {
    kind: FeatureKind,
    column: usize,
    d_embedding: usize,

    #[config(default = 0)]
    cardinality: usize,
}

impl FeatureEmbedderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureEmbedder<B> {
        let layer = match self.kind {
            FeatureKind::Static => FeatureLayer::Static(
                EmbeddingConfig::new(self.cardinality, self.d_embedding).init(device),
            ),
            FeatureKind::Categorical => FeatureLayer::Categorical(
                EmbeddingConfig::new(self.cardinality, self.d_embedding).init(device),
            ),
            FeatureKind::Real => {
                FeatureLayer::Real(LinearConfig::new(1, self.d_embedding).init(device))
            }
        };

        FeatureEmbedder {
            column: self.column,
            layer,
            steps: TimeDistributedConfig::new().with_batch_first(true).init(),
        }
    }
}
