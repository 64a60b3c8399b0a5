use burn::config::Config;
use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// `sigmoid(W1 x + b1) * (W2 x + b2)`, same width in and out.
#[derive(Module, Debug)]
pub struct GatedLinearUnit<B: Backend> {
    gate: Linear<B>,
    value: Linear<B>,
}

impl<B: Backend> GatedLinearUnit<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let gate = activation::sigmoid(self.gate.forward(x.clone()));
        let value = self.value.forward(x);

        gate * value
    }
}

#[derive(Config, Debug)]
pub struct GatedLinearUnitConfig {
    d_input: usize,

    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl GatedLinearUnitConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedLinearUnit<B> {
        let linear = || {
            let config = LinearConfig::new(self.d_input, self.d_input);
            match &self.initializer {
                Some(init) => config.with_initializer(init.clone()),
                None => config,
            }
        };

        GatedLinearUnit {
            gate: linear().init(device),
            value: linear().init(device),
        }
    }
}
