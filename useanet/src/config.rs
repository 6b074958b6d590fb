//! SEANet encoder/decoder hyperparameters.
//!
//! Field names and defaults match the upstream PyTorch model arguments so exported
//! JSON configs deserialize unchanged. Names (activation, norm, pad mode, skip
//! type) stay strings here and are resolved once by `validate`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::audio::decoder::skip::SkipConnectionType;
use crate::error::{Error, Result};
use crate::nn::{Activation, ConvOptions, Norm, PadMode};

// ---------------------------------------------------------------------------
// Shared defaults
// ---------------------------------------------------------------------------

fn default_channels() -> usize { 1 }
fn default_dimension() -> usize { 128 }
fn default_n_filters() -> usize { 32 }
fn default_n_residual_layers() -> usize { 1 }
fn default_ratios() -> Vec<usize> { vec![8, 5, 4, 2] }
fn default_activation() -> String { "ELU".to_string() }
fn default_activation_params() -> HashMap<String, f64> { HashMap::from([("alpha".to_string(), 1.0)]) }
fn default_norm() -> String { "weight_norm".to_string() }
fn default_kernel_size() -> usize { 7 }
fn default_last_kernel_size() -> usize { 7 }
fn default_residual_kernel_size() -> usize { 3 }
fn default_dilation_base() -> usize { 2 }
fn default_pad_mode() -> String { "reflect".to_string() }
fn default_compress() -> usize { 2 }
fn default_lstm() -> usize { 2 }
fn default_trim_right_ratio() -> f64 { 1.0 }
fn default_skip_connection_type() -> String { "cat_linear".to_string() }
fn default_n_filters_encoder() -> usize { 32 }

/// Names resolved to concrete kinds, shared by encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    pub activation: Activation,
    pub conv: ConvOptions,
}

/// Decoder-only resolved options on top of [`ResolvedOptions`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedDecoderOptions {
    pub common: ResolvedOptions,
    pub final_activation: Option<Activation>,
    pub skip_connection_type: SkipConnectionType,
}

fn resolve_common(
    activation: &str,
    activation_params: &HashMap<String, f64>,
    norm: &str,
    norm_params: &HashMap<String, f64>,
    causal: bool,
    pad_mode: &str,
) -> Result<ResolvedOptions> {
    let activation = Activation::from_name(activation, activation_params)?;
    let norm = Norm::from_name(norm)?;
    if let Some(key) = norm_params.keys().find(|k| k.as_str() != "eps") {
        return Err(Error::invalid(format!("unsupported norm parameter `{key}`")));
    }
    let norm_eps = norm_params.get("eps").copied().unwrap_or(1e-5);
    if norm_eps <= 0.0 {
        return Err(Error::invalid(format!("norm eps must be positive, got {norm_eps}")));
    }
    let pad_mode = PadMode::from_name(pad_mode)?;
    if causal && norm == Norm::TimeGroupNorm {
        return Err(Error::invalid(
            "time_group_norm normalizes over the whole sequence and cannot be causal",
        ));
    }
    Ok(ResolvedOptions {
        activation,
        conv: ConvOptions {
            norm,
            norm_eps,
            causal,
            pad_mode,
        },
    })
}

fn check_positive(fields: &[(&str, usize)]) -> Result<()> {
    match fields.iter().find(|(_, v)| *v == 0) {
        Some((name, _)) => Err(Error::invalid(format!("{name} must be positive"))),
        None => Ok(()),
    }
}

fn check_ratios(ratios: &[usize]) -> Result<()> {
    if ratios.contains(&0) {
        return Err(Error::invalid(format!("ratios must be non-zero, got {ratios:?}")));
    }
    Ok(())
}

/// Widest stage is `n_filters * 2^S`; largest dilation is
/// `dilation_base^(n_residual_layers - 1)`. Both must fit in `usize`.
fn check_growth(
    n_filters: usize,
    num_stages: usize,
    dilation_base: usize,
    n_residual_layers: usize,
) -> Result<()> {
    let widest = u32::try_from(num_stages)
        .ok()
        .and_then(|s| 1usize.checked_shl(s))
        .and_then(|mult| n_filters.checked_mul(mult));
    if widest.is_none() {
        return Err(Error::invalid(format!(
            "n_filters={n_filters} with {num_stages} stages overflows the channel width"
        )));
    }
    let max_dilation = u32::try_from(n_residual_layers.saturating_sub(1))
        .ok()
        .and_then(|exp| dilation_base.checked_pow(exp));
    if max_dilation.is_none() {
        return Err(Error::invalid(format!(
            "dilation_base={dilation_base} with {n_residual_layers} residual layers overflows"
        )));
    }
    Ok(())
}

fn check_compress(n_filters: usize, compress: usize) -> Result<()> {
    if compress == 0 || n_filters / compress == 0 {
        return Err(Error::invalid(format!(
            "compress={compress} leaves no residual channels for n_filters={n_filters}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SEANetEncoderConfig {
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_n_filters")]
    pub n_filters: usize,
    #[serde(default = "default_n_residual_layers")]
    pub n_residual_layers: usize,
    /// Upsampling order; the encoder walks it reversed.
    #[serde(default = "default_ratios")]
    pub ratios: Vec<usize>,
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default = "default_activation_params")]
    pub activation_params: HashMap<String, f64>,
    #[serde(default = "default_norm")]
    pub norm: String,
    #[serde(default)]
    pub norm_params: HashMap<String, f64>,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default = "default_last_kernel_size")]
    pub last_kernel_size: usize,
    #[serde(default = "default_residual_kernel_size")]
    pub residual_kernel_size: usize,
    #[serde(default = "default_dilation_base")]
    pub dilation_base: usize,
    #[serde(default)]
    pub causal: bool,
    #[serde(default = "default_pad_mode")]
    pub pad_mode: String,
    #[serde(default)]
    pub true_skip: bool,
    #[serde(default = "default_compress")]
    pub compress: usize,
    #[serde(default = "default_lstm")]
    pub lstm: usize,
}

impl Default for SEANetEncoderConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

impl SEANetEncoderConfig {
    /// Samples per latent frame.
    pub fn hop_length(&self) -> usize {
        self.ratios.iter().product()
    }

    /// Check sizes and resolve every name. Nothing is allocated.
    pub fn validate(&self) -> Result<ResolvedOptions> {
        check_positive(&[
            ("channels", self.channels),
            ("dimension", self.dimension),
            ("n_filters", self.n_filters),
            ("kernel_size", self.kernel_size),
            ("last_kernel_size", self.last_kernel_size),
            ("residual_kernel_size", self.residual_kernel_size),
            ("dilation_base", self.dilation_base),
        ])?;
        check_ratios(&self.ratios)?;
        check_growth(
            self.n_filters,
            self.ratios.len(),
            self.dilation_base,
            self.n_residual_layers,
        )?;
        check_compress(self.n_filters, self.compress)?;
        resolve_common(
            &self.activation,
            &self.activation_params,
            &self.norm,
            &self.norm_params,
            self.causal,
            &self.pad_mode,
        )
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SEANetDecoderConfig {
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_n_filters")]
    pub n_filters: usize,
    #[serde(default = "default_n_residual_layers")]
    pub n_residual_layers: usize,
    #[serde(default = "default_ratios")]
    pub ratios: Vec<usize>,
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default = "default_activation_params")]
    pub activation_params: HashMap<String, f64>,
    /// Optional bounding activation on the output, e.g. `Tanh`.
    #[serde(default)]
    pub final_activation: Option<String>,
    #[serde(default)]
    pub final_activation_params: Option<HashMap<String, f64>>,
    #[serde(default = "default_norm")]
    pub norm: String,
    #[serde(default)]
    pub norm_params: HashMap<String, f64>,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default = "default_last_kernel_size")]
    pub last_kernel_size: usize,
    #[serde(default = "default_residual_kernel_size")]
    pub residual_kernel_size: usize,
    #[serde(default = "default_dilation_base")]
    pub dilation_base: usize,
    #[serde(default)]
    pub causal: bool,
    #[serde(default = "default_pad_mode")]
    pub pad_mode: String,
    #[serde(default)]
    pub true_skip: bool,
    #[serde(default = "default_compress")]
    pub compress: usize,
    #[serde(default = "default_lstm")]
    pub lstm: usize,
    /// Share of causal transposed-conv trimming taken from the right.
    #[serde(default = "default_trim_right_ratio")]
    pub trim_right_ratio: f64,
    #[serde(default = "default_skip_connection_type")]
    pub skip_connection_type: String,
    /// Base width of the paired encoder; sizes the adapters.
    #[serde(default = "default_n_filters_encoder")]
    pub n_filters_encoder: usize,
}

impl Default for SEANetDecoderConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

impl SEANetDecoderConfig {
    /// Output samples per latent frame.
    pub fn hop_length(&self) -> usize {
        self.ratios.iter().product()
    }

    pub fn validate(&self) -> Result<ResolvedDecoderOptions> {
        check_positive(&[
            ("channels", self.channels),
            ("dimension", self.dimension),
            ("n_filters", self.n_filters),
            ("n_filters_encoder", self.n_filters_encoder),
            ("kernel_size", self.kernel_size),
            ("last_kernel_size", self.last_kernel_size),
            ("residual_kernel_size", self.residual_kernel_size),
            ("dilation_base", self.dilation_base),
        ])?;
        check_ratios(&self.ratios)?;
        check_growth(
            self.n_filters,
            self.ratios.len(),
            self.dilation_base,
            self.n_residual_layers,
        )?;
        check_compress(self.n_filters, self.compress)?;
        if !(0.0..=1.0).contains(&self.trim_right_ratio) {
            return Err(Error::invalid(format!(
                "trim_right_ratio must be in [0, 1], got {}",
                self.trim_right_ratio
            )));
        }
        if !self.causal && self.trim_right_ratio != 1.0 {
            return Err(Error::invalid(
                "trim_right_ratio other than 1.0 requires causal convolutions",
            ));
        }
        let common = resolve_common(
            &self.activation,
            &self.activation_params,
            &self.norm,
            &self.norm_params,
            self.causal,
            &self.pad_mode,
        )?;
        let final_activation = Activation::from_optional(
            self.final_activation.as_deref(),
            self.final_activation_params.as_ref(),
        )?;
        let skip_connection_type = SkipConnectionType::from_name(&self.skip_connection_type)?;
        Ok(ResolvedDecoderOptions {
            common,
            final_activation,
            skip_connection_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Paired
// ---------------------------------------------------------------------------

/// Encoder and decoder configured as one autoencoder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SEANetCodecConfig {
    #[serde(default)]
    pub encoder: SEANetEncoderConfig,
    #[serde(default)]
    pub decoder: SEANetDecoderConfig,
}

impl SEANetCodecConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validate both halves and the contract between them.
    ///
    /// Both sides take the ratio list in upsampling order; the encoder walks it
    /// reversed, so equal lists give mirrored stage resolutions.
    pub fn validate(&self) -> Result<(ResolvedOptions, ResolvedDecoderOptions)> {
        let enc = self.encoder.validate()?;
        let dec = self.decoder.validate()?;
        let (e, d) = (&self.encoder, &self.decoder);
        if e.ratios != d.ratios {
            return Err(Error::mismatch(format!(
                "encoder ratios {:?} do not mirror decoder ratios {:?}",
                e.ratios, d.ratios
            )));
        }
        if d.n_filters_encoder != e.n_filters {
            return Err(Error::mismatch(format!(
                "decoder n_filters_encoder={} but encoder n_filters={}",
                d.n_filters_encoder, e.n_filters
            )));
        }
        if e.dimension != d.dimension {
            return Err(Error::mismatch(format!(
                "latent dimension {} (encoder) vs {} (decoder)",
                e.dimension, d.dimension
            )));
        }
        if e.channels != d.channels {
            return Err(Error::mismatch(format!(
                "audio channels {} (encoder) vs {} (decoder)",
                e.channels, d.channels
            )));
        }
        Ok((enc, dec))
    }
}
