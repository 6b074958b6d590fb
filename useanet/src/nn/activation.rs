//! Nonlinearities resolved once from their PyTorch class names.

use std::collections::HashMap;

use candle_core::{Result, Tensor};
use candle_nn::Module;

use crate::error::{ConfigError, Error};

/// Supported nonlinearities with their parameters already bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Elu { alpha: f64 },
    Relu,
    LeakyRelu { negative_slope: f64 },
    Gelu,
    Silu,
    Tanh,
    Sigmoid,
    Hardtanh { min_val: f64, max_val: f64 },
    Identity,
}

impl Activation {
    /// Resolve a PyTorch class name (`ELU`, `LeakyReLU`, `Tanh`, ...) and its
    /// keyword parameters. Parameters not listed fall back to PyTorch defaults.
    pub fn from_name(name: &str, params: &HashMap<String, f64>) -> crate::Result<Self> {
        let allowed: &[&str] = match name {
            "ELU" => &["alpha"],
            "LeakyReLU" => &["negative_slope"],
            "Hardtanh" => &["min_val", "max_val"],
            "ReLU" | "GELU" | "SiLU" | "Tanh" | "Sigmoid" | "Identity" => &[],
            other => return Err(ConfigError::UnknownActivation(other.to_string()).into()),
        };
        if let Some(param) = params.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(Error::Config(ConfigError::InvalidActivationParam {
                activation: name.to_string(),
                param: param.clone(),
            }));
        }
        let get = |key: &str, default: f64| params.get(key).copied().unwrap_or(default);

        let act = match name {
            "ELU" => Self::Elu { alpha: get("alpha", 1.0) },
            "LeakyReLU" => Self::LeakyRelu {
                negative_slope: get("negative_slope", 0.01),
            },
            "Hardtanh" => {
                let (min_val, max_val) = (get("min_val", -1.0), get("max_val", 1.0));
                if min_val >= max_val {
                    return Err(Error::invalid(format!(
                        "Hardtanh min_val ({min_val}) must be below max_val ({max_val})"
                    )));
                }
                Self::Hardtanh { min_val, max_val }
            }
            "ReLU" => Self::Relu,
            "GELU" => Self::Gelu,
            "SiLU" => Self::Silu,
            "Tanh" => Self::Tanh,
            "Sigmoid" => Self::Sigmoid,
            _ => Self::Identity,
        };
        Ok(act)
    }

    /// Resolve an optional activation; `None` maps to `None`.
    pub fn from_optional(
        name: Option<&str>,
        params: Option<&HashMap<String, f64>>,
    ) -> crate::Result<Option<Self>> {
        match name {
            Some(name) => {
                let empty = HashMap::new();
                Self::from_name(name, params.unwrap_or(&empty)).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match *self {
            Self::Elu { alpha } => xs.elu(alpha),
            Self::Relu => xs.relu(),
            Self::LeakyRelu { negative_slope } => candle_nn::ops::leaky_relu(xs, negative_slope),
            Self::Gelu => xs.gelu_erf(),
            Self::Silu => xs.silu(),
            Self::Tanh => xs.tanh(),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
            Self::Hardtanh { min_val, max_val } => xs.clamp(min_val, max_val),
            Self::Identity => Ok(xs.clone()),
        }
    }
}
