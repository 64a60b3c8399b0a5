use burn::config::Config;
use burn::module::Module;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
};
use burn::tensor::{backend::Backend, Tensor};

use crate::modules::elu::{Elu, EluConfig};

use super::glu::{GatedLinearUnit, GatedLinearUnitConfig};

/// Gated residual network:
///
/// ```text
/// h   = ELU(W1 x + b1 + Wc c)
/// h   = Dropout(W2 h + b2)
/// out = BatchNorm(GLU(h) + x)
/// ```
///
/// The context projection carries no bias, so calling without context is the
/// same as calling with an all-zero context. Any leading axes are accepted;
/// normalization runs over the flattened rows of the last axis.
#[derive(Module, Debug)]
pub struct GatedResidualNetwork<B: Backend> {
    input_linear: Linear<B>,
    context_linear: Option<Linear<B>>,
    elu: Elu,
    hidden_linear: Linear<B>,
    dropout: Dropout,
    gate: GatedLinearUnit<B>,
    norm: BatchNorm<B, 1>,
}

impl<B: Backend> GatedResidualNetwork<B> {
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
        c: Option<Tensor<B, D>>,
    ) -> Tensor<B, D> {
        let residual = x.clone();

        let x = self.input_linear.forward(x);
        let x = match (&self.context_linear, c) {
            (Some(proj), Some(c)) => x + proj.forward(c),
            (None, Some(_)) => {
                panic!("context supplied to a gated residual network built without d_context")
            }
            (_, None) => x,
        };
        let x = self.elu.forward(x);

        let x = self.hidden_linear.forward(x);
        let x = self.dropout.forward(x);
        let x = self.gate.forward(x);

        self.normalize(x + residual)
    }

    fn normalize<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dims = x.dims();
        let channels = dims[D - 1];

        // BatchNorm wants [rows, channels, length].
        let rows: Tensor<B, 3> = x.reshape([-1, channels as i32, 1]);
        self.norm.forward(rows).reshape(dims)
    }
}

#[derive(Config, Debug)]
pub struct GatedResidualNetworkConfig {
    d_input: usize,

    #[config(default = "None")]
    d_context: Option<usize>,

    #[config(default = 0.0)]
    dropout: f64,

    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl GatedResidualNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedResidualNetwork<B> {
        let d_input = self.d_input;

        let linear = |config: LinearConfig| match &self.initializer {
            Some(init) => config.with_initializer(init.clone()),
            None => config,
        };

        let context_linear = self.d_context.map(|d_context| {
            linear(LinearConfig::new(d_context, d_input).with_bias(false)).init(device)
        });

        GatedResidualNetwork {
            input_linear: linear(LinearConfig::new(d_input, d_input)).init(device),
            context_linear,
            elu: EluConfig::new().init(),
            hidden_linear: linear(LinearConfig::new(d_input, d_input)).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            gate: GatedLinearUnitConfig::new(d_input)
                .with_initializer(self.initializer.clone())
                .init(device),
            norm: BatchNormConfig::new(d_input).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn to_vec<const D: usize>(x: Tensor<TestBackend, D>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_grn_zero_weights_reduces_to_normalized_residual() {
        let device = Default::default();
        let grn = GatedResidualNetworkConfig::new(8)
            .with_initializer(Some(Initializer::Zeros))
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 3>::random([4, 3, 8], Distribution::Default, &device);
        let y = grn.forward(x.clone(), None);
        assert_eq!(y.dims(), [4, 3, 8]);

        // Without gradients BatchNorm uses its running statistics (mean 0,
        // variance 1), which only divides by sqrt(1 + eps).
        let scale = 1.0 / (1.0f32 + 1e-5).sqrt();
        for (out, inp) in to_vec(y).into_iter().zip(to_vec(x)) {
            assert!((out - inp * scale).abs() < 1e-5);
        }
    }

    #[test]
    fn test_grn_missing_context_matches_zero_context() {
        let device = Default::default();
        let grn = GatedResidualNetworkConfig::new(6)
            .with_d_context(Some(4))
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 3>::random([2, 5, 6], Distribution::Default, &device);
        let zeros = Tensor::<TestBackend, 3>::zeros([2, 5, 4], &device);

        let without = to_vec(grn.forward(x.clone(), None));
        let with_zero = to_vec(grn.forward(x, Some(zeros)));

        for (a, b) in without.into_iter().zip(with_zero) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_grn_context_changes_output() {
        let device = Default::default();
        let grn = GatedResidualNetworkConfig::new(6)
            .with_d_context(Some(4))
            .with_initializer(Some(Initializer::Constant { value: 0.1 }))
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 2>::ones([3, 6], &device);
        let c = Tensor::<TestBackend, 2>::ones([3, 4], &device);

        let without = to_vec(grn.forward(x.clone(), None));
        let with = to_vec(grn.forward(x, Some(c)));

        assert!(without
            .into_iter()
            .zip(with)
            .any(|(a, b)| (a - b).abs() > 1e-4));
    }

    #[test]
    #[should_panic(expected = "without d_context")]
    fn test_grn_rejects_unexpected_context() {
        let device = Default::default();
        let grn = GatedResidualNetworkConfig::new(4).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        grn.forward(x.clone(), Some(x));
    }
}
