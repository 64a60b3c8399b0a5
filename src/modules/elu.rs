use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

/// Exponential linear unit: `x` for positive inputs, `alpha * (exp(x) - 1)`
/// otherwise.
#[derive(Module, Clone, Debug)]
pub struct Elu {
    alpha: f64,
}

impl Elu {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let negative = x.clone().lower_equal_elem(0.0);
        let saturated = x.clone().exp().sub_scalar(1.0).mul_scalar(self.alpha);

        x.mask_where(negative, saturated)
    }
}

#[derive(Config, Debug)]
pub struct EluConfig {
    #[config(default = 1.0)]
    alpha: f64,
}

impl EluConfig {
    pub fn init(&self) -> Elu {
        Elu { alpha: self.alpha }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_elu_values() {
        let device = Default::default();
        let elu = EluConfig::new().init();

        let x = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.0, 2.0], &device);
        let y = elu.forward(x).into_data().to_vec::<f32>().unwrap();

        assert!((y[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!(y[1].abs() < 1e-6);
        assert!((y[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_elu_alpha_scales_negative_branch() {
        let device = Default::default();
        let elu = EluConfig::new().with_alpha(2.0).init();

        let x = Tensor::<TestBackend, 1>::from_floats([-1.0], &device);
        let y = elu.forward(x).into_scalar();

        assert!((y - 2.0 * ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
    }
}
