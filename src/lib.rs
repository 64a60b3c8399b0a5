//! Temporal Fusion Transformer for multi-horizon time-series forecasting.
//!
//! The model fuses static identifiers, time-varying categorical codes and
//! time-varying real values into one channel representation, runs an LSTM
//! encoder over the historical window and an LSTM decoder over the forecast
//! horizon, enriches the result with static context and attends over the
//! whole timeline under a causal mask.

pub mod data;
pub mod error;
pub mod models;
pub mod modules;
pub mod utils;

pub use data::batchitem::{ForecastBatch, InputBatch};
pub use error::{Result, TftError};
pub use models::tft::model::{
    TemporalFusionTransformer, TemporalFusionTransformerConfig, TftOutput,
};
pub use utils::{causal_mask, quantile_loss};
