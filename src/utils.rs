use burn::nn::attention::generate_autoregressive_mask;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

use crate::error::{Result, TftError};

/// Pinball loss for one quantile, summed over the last axis.
///
/// `D2` must be `D - 1`.
pub fn quantile_loss<B: Backend, const D: usize, const D2: usize>(
    y_true: Tensor<B, D>,
    y_pred: Tensor<B, D>,
    quantile: f64,
) -> Result<Tensor<B, D2>> {
    if !(0.0..=1.0).contains(&quantile) {
        return Err(TftError::InvalidQuantile(quantile));
    }

    Ok(pinball(y_true, y_pred, quantile))
}

/// Unchecked body of [`quantile_loss`].
pub(crate) fn pinball<B: Backend, const D: usize, const D2: usize>(
    y_true: Tensor<B, D>,
    y_pred: Tensor<B, D>,
    quantile: f64,
) -> Tensor<B, D2> {
    let underflow = y_true - y_pred;
    let loss = relu(underflow.clone()).mul_scalar(quantile)
        + relu(underflow.neg()).mul_scalar(1.0 - quantile);

    loss.sum_dim(D - 1).squeeze(D - 1)
}

/// Additive `[size, size]` mask: `-inf` where the column is ahead of the row,
/// zero elsewhere.
pub fn causal_mask<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 2> {
    let future = generate_autoregressive_mask::<B>(1, size, device).squeeze::<2>(0);

    Tensor::zeros([size, size], device).mask_fill(future, f32::NEG_INFINITY)
}
