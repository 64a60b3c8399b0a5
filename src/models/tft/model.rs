use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Int;
use burn::tensor::{backend::Backend, Tensor};
use burn::train::{RegressionOutput, TrainOutput, TrainStep, ValidStep};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::data::batchitem::{ForecastBatch, InputBatch};
use crate::error::{self, TftError};
use crate::modules::time_distributed::{TimeDistributed, TimeDistributedConfig};
use crate::utils::pinball;

use super::feature_embedder::{FeatureEmbedder, FeatureEmbedderConfig, FeatureKind};
use super::lstm::HiddenState;
use super::tfd::{TemporalFusionDecoder, TemporalFusionDecoderConfig};
use super::tfe::{TemporalFusionEncoder, TemporalFusionEncoderConfig};

/// Everything one forward pass produces.
#[derive(Clone, Debug)]
pub struct TftOutput<B: Backend> {
    /// `[batch, decode_length, quantiles]`
    pub forecast: Tensor<B, 3>,
    /// `[encode_length, batch, hidden]`
    pub encoder_output: Tensor<B, 3>,
    /// `[decode_length, batch, hidden]`
    pub decoder_output: Tensor<B, 3>,
    /// Attended decode window, `[decode_length, batch, hidden]`
    pub attention_output: Tensor<B, 3>,
    /// Head-averaged weights, `[batch, T, T]` with `T = encode + decode`
    pub attention_weights: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct TemporalFusionTransformer<B: Backend> {
    encode_length: usize,
    num_layers: usize,
    d_hidden: usize,
    d_fused: usize,
    quantiles: Vec<f64>,
    embedders: Vec<FeatureEmbedder<B>>,
    temporal_encoder: TemporalFusionEncoder<B>,
    temporal_decoder: TemporalFusionDecoder<B>,
    output_proj: Linear<B>,
    output_steps: TimeDistributed,
}

impl<B: Backend> TemporalFusionTransformer<B> {
    fn embedders_of(&self, kind: FeatureKind) -> impl Iterator<Item = &FeatureEmbedder<B>> {
        self.embedders.iter().filter(move |emb| emb.kind() == kind)
    }

    // `[batch, d_static]`, first time step only.
    fn static_embedding(&self, identifier: Tensor<B, 3, Int>) -> Tensor<B, 2> {
        let [batch, _, _] = identifier.dims();

        let vectors: Vec<Tensor<B, 3>> = self
            .embedders_of(FeatureKind::Static)
            .map(|emb| {
                let col = emb.column();
                let codes = identifier.clone().slice([0..batch, 0..1, col..col + 1]);
                emb.forward_codes(codes)
            })
            .collect();

        Tensor::cat(vectors, 2).squeeze::<2>(1)
    }

    /// Fuses one window `[batch, time, features]` into time-major
    /// `[time, batch, d_fused]`: static, then categorical, then real channels.
    fn apply_embedding(&self, x: Tensor<B, 3>, static_embedding: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, time, _] = x.dims();

        let mut channels = vec![Tensor::cat(
            vec![static_embedding.unsqueeze_dim::<3>(1); time],
            1,
        )];
        for kind in [FeatureKind::Categorical, FeatureKind::Real] {
            channels.extend(self.embedders_of(kind).map(|emb| {
                let col = emb.column();
                emb.forward(x.clone().slice([0..batch, 0..time, col..col + 1]))
            }));
        }

        let embeddings = Tensor::cat(channels, 2);
        assert_eq!(
            embeddings.dims(),
            [batch, time, self.d_fused],
            "fused embedding must be [batch, time, d_fused]"
        );
        trace!(dims = ?embeddings.dims(), "fused window embedding");

        embeddings.swap_dims(0, 1)
    }

    pub fn init_hidden(&self, batch: usize, device: &B::Device) -> HiddenState<B> {
        HiddenState::zeros(self.num_layers, batch, self.d_hidden, device)
    }

    pub fn forward(&self, batch: InputBatch<B>, device: &B::Device) -> TftOutput<B> {
        let InputBatch { identifier, inputs } = batch.to_device(device);
        let [batch_size, seq_len, n_features] = inputs.dims();
        assert!(
            seq_len > self.encode_length,
            "input of {} steps leaves no decode window after {} encoder steps",
            seq_len,
            self.encode_length
        );
        debug!(
            batch_size,
            encode_length = self.encode_length,
            decode_length = seq_len - self.encode_length,
            "temporal fusion forward"
        );

        let static_embedding = self.static_embedding(identifier);

        let ctx_input = inputs
            .clone()
            .slice([0..batch_size, 0..self.encode_length, 0..n_features]);
        let tgt_input = inputs.slice([0..batch_size, self.encode_length..seq_len, 0..n_features]);

        let embeddings_encoder = self.apply_embedding(ctx_input, static_embedding.clone());
        let embeddings_decoder = self.apply_embedding(tgt_input, static_embedding.clone());

        let (encoder_output, decoder_output) = self.temporal_encoder.forward(
            embeddings_encoder,
            embeddings_decoder,
            Some(self.init_hidden(batch_size, device)),
        );

        let lstm_output = Tensor::cat(vec![encoder_output.clone(), decoder_output.clone()], 0);
        let (attention_output, attention_weights) =
            self.temporal_decoder
                .forward(lstm_output, static_embedding, device);

        let forecast = self.output_steps.forward(
            attention_output.clone().swap_dims(0, 1),
            |rows| self.output_proj.forward(rows),
        );

        TftOutput {
            forecast,
            encoder_output,
            decoder_output,
            attention_output,
            attention_weights,
        }
    }

    /// Checks the batch against `config` before running [`Self::forward`].
    pub fn try_forward(
        &self,
        batch: InputBatch<B>,
        config: &TemporalFusionTransformerConfig,
        device: &B::Device,
    ) -> error::Result<TftOutput<B>> {
        batch.check(config)?;
        Ok(self.forward(batch, device))
    }

    /// Mean pinball loss over batch, horizon and configured quantiles.
    /// `forecast` is `[batch, decode, quantiles]`, `target` `[batch, decode, 1]`.
    pub fn forecast_loss(&self, forecast: Tensor<B, 3>, target: Tensor<B, 3>) -> Tensor<B, 1> {
        let [batch, horizon, _] = forecast.dims();

        let losses: Vec<Tensor<B, 1>> = self
            .quantiles
            .iter()
            .enumerate()
            .map(|(k, quantile)| {
                let pred = forecast.clone().slice([0..batch, 0..horizon, k..k + 1]);
                let loss: Tensor<B, 2> = pinball(target.clone(), pred, *quantile);
                loss.mean()
            })
            .collect();

        Tensor::cat(losses, 0).mean()
    }

    pub fn forward_regression(&self, item: ForecastBatch<B>) -> RegressionOutput<B> {
        let device = item.target.device();
        let output = self.forward(item.batch, &device);

        let loss = self.forecast_loss(output.forecast.clone(), item.target.clone());
        let output_pred = output.forecast.mean_dim(2).squeeze::<2>(2);
        let output_targets = item.target.squeeze::<2>(2);

        RegressionOutput::new(loss, output_pred, output_targets)
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }
}

impl<B: AutodiffBackend> TrainStep<ForecastBatch<B>, RegressionOutput<B>>
    for TemporalFusionTransformer<B>
{
    fn step(&self, batch: ForecastBatch<B>) -> TrainOutput<RegressionOutput<B>> {
        let item = self.forward_regression(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ForecastBatch<B>, RegressionOutput<B>>
    for TemporalFusionTransformer<B>
{
    fn step(&self, batch: ForecastBatch<B>) -> RegressionOutput<B> {
        self.forward_regression(batch)
    }
}

#[derive(Config, Debug)]
pub struct TemporalFusionTransformerConfig {
    pub batch_size: usize,
    pub static_variables: usize,
    pub encode_length: usize,
    pub time_varying_categorical_variables: usize,
    pub time_varying_real_variables: usize,
    pub time_varying_embedding_vocab_sizes: Vec<usize>,
    pub static_embedding_vocab_sizes: Vec<usize>,
    pub embedding_dim: usize,
    pub lstm_hidden_dimension: usize,
    pub lstm_layers: usize,
    pub dropout: f64,
    pub attn_heads: usize,

    #[config(default = "vec![0.5]")]
    pub quantiles: Vec<f64>,

    #[config(default = false)]
    pub position_wise_feed_forward: bool,
}

/// JSON form of [`TemporalFusionTransformerConfig`] in which `quantiles` and
/// `position_wise_feed_forward` may be left out.
#[derive(Deserialize)]
struct ConfigRecord {
    batch_size: usize,
    static_variables: usize,
    encode_length: usize,
    time_varying_categorical_variables: usize,
    time_varying_real_variables: usize,
    time_varying_embedding_vocab_sizes: Vec<usize>,
    static_embedding_vocab_sizes: Vec<usize>,
    embedding_dim: usize,
    lstm_hidden_dimension: usize,
    lstm_layers: usize,
    dropout: f64,
    attn_heads: usize,
    #[serde(default)]
    quantiles: Option<Vec<f64>>,
    #[serde(default)]
    position_wise_feed_forward: bool,
}

impl From<ConfigRecord> for TemporalFusionTransformerConfig {
    fn from(record: ConfigRecord) -> Self {
        let config = Self::new(
            record.batch_size,
            record.static_variables,
            record.encode_length,
            record.time_varying_categorical_variables,
            record.time_varying_real_variables,
            record.time_varying_embedding_vocab_sizes,
            record.static_embedding_vocab_sizes,
            record.embedding_dim,
            record.lstm_hidden_dimension,
            record.lstm_layers,
            record.dropout,
            record.attn_heads,
        )
        .with_position_wise_feed_forward(record.position_wise_feed_forward);

        match record.quantiles {
            Some(quantiles) => config.with_quantiles(quantiles),
            None => config,
        }
    }
}

impl TemporalFusionTransformerConfig {
    pub fn from_json(json: &str) -> error::Result<Self> {
        let record: ConfigRecord =
            serde_json::from_str(json).map_err(|err| TftError::Config(err.to_string()))?;
        let config = Self::from(record);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> error::Result<()> {
        let fail = |msg: String| Err(TftError::Config(msg));

        if self.static_embedding_vocab_sizes.len() != self.static_variables {
            return fail(format!(
                "{} static vocab sizes for {} static variables",
                self.static_embedding_vocab_sizes.len(),
                self.static_variables
            ));
        }
        if self.time_varying_embedding_vocab_sizes.len() != self.time_varying_categorical_variables
        {
            return fail(format!(
                "{} time-varying vocab sizes for {} categorical variables",
                self.time_varying_embedding_vocab_sizes.len(),
                self.time_varying_categorical_variables
            ));
        }
        if self
            .static_embedding_vocab_sizes
            .iter()
            .chain(self.time_varying_embedding_vocab_sizes.iter())
            .any(|size| *size == 0)
        {
            return fail("vocab sizes must be positive".to_string());
        }
        if self.static_variables == 0 {
            return fail("at least one static variable is required for enrichment".to_string());
        }
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("encode_length", self.encode_length),
            ("embedding_dim", self.embedding_dim),
            ("lstm_hidden_dimension", self.lstm_hidden_dimension),
            ("lstm_layers", self.lstm_layers),
            ("attn_heads", self.attn_heads),
        ] {
            if value == 0 {
                return fail(format!("{} must be positive", name));
            }
        }
        if self.lstm_hidden_dimension % self.attn_heads != 0 {
            return fail(format!(
                "lstm_hidden_dimension {} is not divisible by {} attention heads",
                self.lstm_hidden_dimension, self.attn_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout {} outside [0, 1)", self.dropout));
        }
        if self.quantiles.is_empty() {
            return fail("at least one quantile is required".to_string());
        }
        if let Some(q) = self.quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
            return Err(TftError::InvalidQuantile(*q));
        }

        Ok(())
    }

    /// Width of the fused per-step embedding.
    pub fn d_fused(&self) -> usize {
        self.embedding_dim
            * (self.static_variables
                + self.time_varying_categorical_variables
                + self.time_varying_real_variables)
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> error::Result<TemporalFusionTransformer<B>> {
        self.validate()?;

        let d_static = self.embedding_dim * self.static_variables;
        let d_fused = self.d_fused();
        let real_count = self.time_varying_real_variables;

        let statics = self
            .static_embedding_vocab_sizes
            .iter()
            .enumerate()
            .map(|(i, vocab)| {
                FeatureEmbedderConfig::new(FeatureKind::Static, i, self.embedding_dim)
                    .with_cardinality(*vocab)
            });
        let categoricals = self
            .time_varying_embedding_vocab_sizes
            .iter()
            .enumerate()
            .map(|(i, vocab)| {
                FeatureEmbedderConfig::new(
                    FeatureKind::Categorical,
                    real_count + i,
                    self.embedding_dim,
                )
                .with_cardinality(*vocab)
            });
        let reals = (0..real_count)
            .map(|i| FeatureEmbedderConfig::new(FeatureKind::Real, i, self.embedding_dim));

        let embedders: Vec<FeatureEmbedder<B>> = statics
            .chain(categoricals)
            .chain(reals)
            .map(|config| config.init(device))
            .collect();

        let temporal_encoder = TemporalFusionEncoderConfig::new(d_fused, self.lstm_hidden_dimension)
            .with_num_layers(self.lstm_layers)
            .with_dropout(self.dropout)
            .init(device);

        let temporal_decoder = TemporalFusionDecoderConfig::new(
            self.encode_length,
            self.lstm_hidden_dimension,
            d_static,
            self.attn_heads,
        )
        .with_dropout(self.dropout)
        .with_position_wise_feed_forward(self.position_wise_feed_forward)
        .init(device);

        let output_proj =
            LinearConfig::new(self.lstm_hidden_dimension, self.quantiles.len()).init(device);

        debug!(
            embedders = embedders.len(),
            d_static,
            d_fused,
            d_hidden = self.lstm_hidden_dimension,
            layers = self.lstm_layers,
            heads = self.attn_heads,
            quantiles = self.quantiles.len(),
            "initialized temporal fusion transformer"
        );

        Ok(TemporalFusionTransformer {
            encode_length: self.encode_length,
            num_layers: self.lstm_layers,
            d_hidden: self.lstm_hidden_dimension,
            d_fused,
            quantiles: self.quantiles.clone(),
            embedders,
            temporal_encoder,
            temporal_decoder,
            output_proj,
            output_steps: TimeDistributedConfig::new().with_batch_first(true).init(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn config(encode_length: usize) -> TemporalFusionTransformerConfig {
        TemporalFusionTransformerConfig::new(
            3,
            2,
            encode_length,
            1,
            2,
            vec![4],
            vec![3, 5],
            8,
            16,
            1,
            0.1,
            2,
        )
    }

    fn batch<B: Backend>(batch: usize, time: usize, device: &B::Device) -> InputBatch<B> {
        let identifier: Vec<i64> = (0..batch * time)
            .flat_map(|i| [(i % 3) as i64, (i % 5) as i64])
            .collect();
        let identifier = Tensor::<B, 3, Int>::from_data(
            TensorData::new(identifier, [batch, time, 2]),
            device,
        );

        let reals = Tensor::<B, 3>::random([batch, time, 2], Distribution::Default, device);
        let codes: Vec<f32> = (0..batch * time).map(|i| (i % 4) as f32).collect();
        let codes = Tensor::<B, 3>::from_data(TensorData::new(codes, [batch, time, 1]), device);

        InputBatch::new(identifier, Tensor::cat(vec![reals, codes], 2))
    }

    fn to_vec<const D: usize>(x: Tensor<TestBackend, D>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_forecast_covers_decode_window() {
        let device = Default::default();
        let model = config(5).init::<TestBackend>(&device).unwrap();

        let output = model.forward(batch(3, 8, &device), &device);

        assert_eq!(output.forecast.dims(), [3, 3, 1]);
        assert_eq!(output.encoder_output.dims(), [5, 3, 16]);
        assert_eq!(output.decoder_output.dims(), [3, 3, 16]);
        assert_eq!(output.attention_output.dims(), [3, 3, 16]);
        assert_eq!(output.attention_weights.dims(), [3, 8, 8]);
    }

    #[test]
    fn test_static_features_read_first_step_only() {
        let device = Default::default();
        let model = config(4).init::<TestBackend>(&device).unwrap();

        let original = batch::<TestBackend>(2, 6, &device);
        let mut shuffled = original.clone();
        let tail = Tensor::<TestBackend, 3, Int>::zeros([2, 5, 2], &device);
        shuffled.identifier = shuffled
            .identifier
            .slice_assign([0..2, 1..6, 0..2], tail);

        let a = model.forward(original, &device);
        let b = model.forward(shuffled, &device);

        for (x, y) in to_vec(a.forecast).into_iter().zip(to_vec(b.forecast)) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_multi_quantile_head() {
        let device = Default::default();
        let model = config(5)
            .with_quantiles(vec![0.1, 0.5, 0.9])
            .init::<TestBackend>(&device)
            .unwrap();

        let output = model.forward(batch(3, 8, &device), &device);
        assert_eq!(output.forecast.dims(), [3, 3, 3]);

        let target = Tensor::<TestBackend, 3>::zeros([3, 3, 1], &device);
        let loss = model.forecast_loss(output.forecast, target);
        assert_eq!(loss.dims(), [1]);
        assert!(loss.into_scalar() >= 0.0);
    }

    #[test]
    fn test_forecast_loss_matches_median_absolute_error() {
        let device = Default::default();
        let model = config(5).init::<TestBackend>(&device).unwrap();

        let forecast = Tensor::<TestBackend, 3>::from_floats([[[1.0], [3.0]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[2.0], [1.0]]], &device);

        // 0.5 * mean(|1 - 2|, |3 - 1|)
        let loss = model.forecast_loss(forecast, target).into_scalar();
        assert!((loss - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_position_wise_feed_forward_variant() {
        let device = Default::default();
        let model = config(5)
            .with_position_wise_feed_forward(true)
            .init::<TestBackend>(&device)
            .unwrap();

        let output = model.forward(batch(3, 8, &device), &device);
        assert_eq!(output.forecast.dims(), [3, 3, 1]);
    }

    #[test]
    fn test_try_forward_rejects_bad_batch() {
        let device = Default::default();
        let cfg = config(5);
        let model = cfg.init::<TestBackend>(&device).unwrap();

        let too_short = batch::<TestBackend>(3, 5, &device);
        assert!(matches!(
            model.try_forward(too_short, &cfg, &device),
            Err(TftError::Shape { what: "inputs", .. })
        ));

        let mut wrong_features = batch::<TestBackend>(3, 8, &device);
        wrong_features.inputs = wrong_features.inputs.slice([0..3, 0..8, 0..2]);
        assert!(matches!(
            model.try_forward(wrong_features, &cfg, &device),
            Err(TftError::Shape { what: "inputs", .. })
        ));

        let mut wrong_statics = batch::<TestBackend>(3, 8, &device);
        wrong_statics.identifier = wrong_statics.identifier.slice([0..3, 0..8, 0..1]);
        assert!(matches!(
            model.try_forward(wrong_statics, &cfg, &device),
            Err(TftError::Shape { what: "identifier", .. })
        ));

        assert!(model.try_forward(batch(3, 8, &device), &cfg, &device).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let device = Default::default();

        let mut cfg = config(5);
        cfg.static_embedding_vocab_sizes = vec![3];
        assert!(matches!(
            cfg.init::<TestBackend>(&device),
            Err(TftError::Config(_))
        ));

        let mut cfg = config(5);
        cfg.attn_heads = 3;
        assert!(matches!(cfg.validate(), Err(TftError::Config(_))));

        let mut cfg = config(0);
        assert!(matches!(cfg.validate(), Err(TftError::Config(_))));
        cfg.encode_length = 5;
        cfg.dropout = 1.0;
        assert!(matches!(cfg.validate(), Err(TftError::Config(_))));

        let cfg = config(5).with_quantiles(vec![0.5, 1.1]);
        assert!(matches!(
            cfg.validate(),
            Err(TftError::InvalidQuantile(q)) if q == 1.1
        ));

        assert!(config(5).validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "batch_size": 6,
            "static_variables": 2,
            "encode_length": 10,
            "time_varying_categorical_variables": 1,
            "time_varying_real_variables": 2,
            "time_varying_embedding_vocab_sizes": [4],
            "static_embedding_vocab_sizes": [3, 5],
            "embedding_dim": 8,
            "lstm_hidden_dimension": 16,
            "lstm_layers": 1,
            "dropout": 0.1,
            "attn_heads": 2
        }"#;

        let cfg = TemporalFusionTransformerConfig::from_json(json).unwrap();
        assert_eq!(cfg.encode_length, 10);
        assert_eq!(cfg.quantiles, vec![0.5]);
        assert!(!cfg.position_wise_feed_forward);
        assert_eq!(cfg.d_fused(), 40);

        let with_quantiles = json.replace(
            "\"attn_heads\": 2",
            "\"attn_heads\": 2, \"quantiles\": [0.1, 0.9]",
        );
        let cfg = TemporalFusionTransformerConfig::from_json(&with_quantiles).unwrap();
        assert_eq!(cfg.quantiles, vec![0.1, 0.9]);
        assert!(!cfg.position_wise_feed_forward);

        let with_ff = json.replace(
            "\"attn_heads\": 2",
            "\"attn_heads\": 2, \"position_wise_feed_forward\": true",
        );
        let cfg = TemporalFusionTransformerConfig::from_json(&with_ff).unwrap();
        assert_eq!(cfg.quantiles, vec![0.5]);
        assert!(cfg.position_wise_feed_forward);

        let bad_quantile = json.replace(
            "\"attn_heads\": 2",
            "\"attn_heads\": 2, \"quantiles\": [1.5]",
        );
        assert!(matches!(
            TemporalFusionTransformerConfig::from_json(&bad_quantile),
            Err(TftError::InvalidQuantile(_))
        ));

        let missing = json.replace("\"attn_heads\": 2", "\"unused\": 2");
        assert!(matches!(
            TemporalFusionTransformerConfig::from_json(&missing),
            Err(TftError::Config(_))
        ));
    }

    #[test]
    fn test_train_step_produces_gradients() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let model = config(5).init::<AutodiffBackend>(&device).unwrap();

        let item = ForecastBatch {
            batch: batch(3, 8, &device),
            target: Tensor::<AutodiffBackend, 3>::zeros([3, 3, 1], &device),
        };
        let output = TrainStep::step(&model, item);

        assert_eq!(output.item.output.dims(), [3, 3]);
        assert_eq!(output.item.targets.dims(), [3, 3]);
    }

    #[test]
    fn test_valid_step_loss_is_scalar() {
        let device = Default::default();
        let model = config(5).init::<TestBackend>(&device).unwrap();

        let item = ForecastBatch {
            batch: batch(3, 8, &device),
            target: Tensor::<TestBackend, 3>::ones([3, 3, 1], &device),
        };
        let output = ValidStep::step(&model, item);

        assert_eq!(output.loss.dims(), [1]);
    }
}
