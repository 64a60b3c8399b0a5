//! Error types for the forecasting core.

use thiserror::Error;

/// Result type alias using [`TftError`].
pub type Result<T> = std::result::Result<T, TftError>;

/// Errors raised before any computation starts.
///
/// Shape problems found in the middle of a forward pass are not translated;
/// they abort the pass the same way the tensor runtime does.
#[derive(Error, Debug)]
pub enum TftError {
    /// Quantile outside of `[0, 1]`.
    #[error("Illegal quantile value={0}! Values should be between 0 and 1.")]
    InvalidQuantile(f64),

    /// Malformed or incomplete model configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input batch that does not match the configuration.
    #[error("Invalid shape for {what}: expected {expected}, got {got}")]
    Shape {
        /// Which tensor is wrong.
        what: &'static str,
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },
}
