use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::{Result, TftError};
use crate::models::tft::model::TemporalFusionTransformerConfig;

/// One batch of model input.
#[derive(Clone, Debug)]
pub struct InputBatch<B: Backend> {
    /// Static category codes `[batch, time, static_variables]`; only the first
    /// time step is read.
    pub identifier: Tensor<B, 3, Int>,
    /// `[batch, time, real + categorical]`: real values first, then category
    /// codes stored as floats.
    pub inputs: Tensor<B, 3>,
}

impl<B: Backend> InputBatch<B> {
    pub fn new(identifier: Tensor<B, 3, Int>, inputs: Tensor<B, 3>) -> Self {
        Self { identifier, inputs }
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            identifier: self.identifier.to_device(device),
            inputs: self.inputs.to_device(device),
        }
    }

    /// Checks the batch against a configuration without running the model.
    pub fn check(&self, config: &TemporalFusionTransformerConfig) -> Result<()> {
        let [batch, time, features] = self.inputs.dims();
        let [id_batch, id_time, statics] = self.identifier.dims();
        let expected_features =
            config.time_varying_real_variables + config.time_varying_categorical_variables;

        if features != expected_features {
            return Err(TftError::Shape {
                what: "inputs",
                expected: format!("[batch, time, {}]", expected_features),
                got: format!("{:?}", [batch, time, features]),
            });
        }
        if time <= config.encode_length {
            return Err(TftError::Shape {
                what: "inputs",
                expected: format!("more than {} time steps", config.encode_length),
                got: format!("{:?}", [batch, time, features]),
            });
        }
        if id_batch != batch || id_time == 0 || statics != config.static_variables {
            return Err(TftError::Shape {
                what: "identifier",
                expected: format!("[{}, time, {}]", batch, config.static_variables),
                got: format!("{:?}", [id_batch, id_time, statics]),
            });
        }

        Ok(())
    }
}

/// Input batch paired with the forecast-window target `[batch, decode, 1]`.
#[derive(Clone, Debug)]
pub struct ForecastBatch<B: Backend> {
    pub batch: InputBatch<B>,
    pub target: Tensor<B, 3>,
}
