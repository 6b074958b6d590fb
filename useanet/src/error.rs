//! Error types for the SEANet encoder/decoder.
//!
//! Layer code returns `candle_core::Result`; everything that validates a
//! configuration returns [`Result`] from this module.

use thiserror::Error;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, grouped by where the failure was detected.
#[derive(Debug, Error)]
pub enum Error {
    /// A single model configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Encoder and decoder configurations do not describe a matching pair.
    #[error("encoder/decoder mismatch: {0}")]
    Mismatch(String),

    /// Tensor backend error
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// JSON config parsing error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// IO error while reading a config file
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration errors, all detected before any tensor is allocated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown activation `{0}`")]
    UnknownActivation(String),

    #[error("activation `{activation}` does not accept parameter `{param}`")]
    InvalidActivationParam { activation: String, param: String },

    #[error("unknown normalization `{0}`")]
    UnknownNorm(String),

    #[error("unknown pad mode `{0}`")]
    UnknownPadMode(String),

    #[error("unrecognized skip_connection_type `{0}` (expected `cat_linear` or `scaled_sum`)")]
    UnknownSkipConnection(String),

    /// Out-of-range or inconsistent hyperparameter.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    pub(crate) fn mismatch(msg: impl Into<String>) -> Self {
        Self::Mismatch(msg.into())
    }
}
