use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

/// Applies a step transformation written for `[rows, features]` input across
/// an extra leading axis.
///
/// Rank-3 input `[a0, a1, features]` is flattened to `[a0 * a1, features]`,
/// transformed, and restored either as `[a0, -1, out]` (batch first) or as
/// `[-1, a1, out]` (default, time first).
#[derive(Module, Clone, Debug)]
pub struct TimeDistributed {
    batch_first: bool,
}

impl TimeDistributed {
    pub fn forward<B, F>(&self, x: Tensor<B, 3>, step: F) -> Tensor<B, 3>
    where
        B: Backend,
        F: FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    {
        let [a0, a1, features] = x.dims();
        let y = step(x.reshape([a0 * a1, features]));
        let [_, out] = y.dims();

        if self.batch_first {
            y.reshape([a0 as i32, -1, out as i32])
        } else {
            y.reshape([-1, a1 as i32, out as i32])
        }
    }

    /// Rank one or two input goes straight through the step.
    pub fn forward_flat<B, F, const D: usize>(&self, x: Tensor<B, D>, step: F) -> Tensor<B, D>
    where
        B: Backend,
        F: FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    {
        assert!(D <= 2, "forward_flat expects rank <= 2, got rank {}", D);

        let mut dims = x.dims();
        let features = dims[D - 1];
        let y = step(x.reshape([-1, features as i32]));
        dims[D - 1] = y.dims()[1];

        y.reshape(dims)
    }
}

#[derive(Config, Debug)]
pub struct TimeDistributedConfig {
    #[config(default = false)]
    batch_first: bool,
}

impl TimeDistributedConfig {
    pub fn init(&self) -> TimeDistributed {
        TimeDistributed {
            batch_first: self.batch_first,
        }
    }
}
