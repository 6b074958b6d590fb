//! SEANet audio encoder/decoder with U-Net style skip fusion, built on candle.
//!
//! The encoder maps a `(batch, channels, time)` waveform to a latent sequence
//! and records the output of every stage nonlinearity. The decoder upsamples
//! the latent back to audio and fuses those recordings in at the matching
//! resolution, either by concatenation + projection (`cat_linear`) or by a
//! learned, zero-initialised scaled sum (`scaled_sum`).
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use useanet::{SEANetCodec, SEANetCodecConfig};
//!
//! # fn main() -> useanet::Result<()> {
//! let config = SEANetCodecConfig::default();
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let codec = SEANetCodec::new(&config, vb)?;
//! let audio = Tensor::zeros((1, 1, 320 * 10), DType::F32, &Device::Cpu)?;
//! let encoded = codec.encode(&audio)?;
//! let reconstructed = codec.decode(&encoded)?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod nn;

pub use audio::codec::SEANetCodec;
pub use audio::decoder::seanet::{DecoderStage, SEANetDecoder};
pub use audio::decoder::skip::{ScaleLayer, SkipAdapter, SkipConnectionType};
pub use audio::encoder::seanet::{EncoderStage, SEANetEncoder, SEANetEncoderOutput};
pub use config::{SEANetCodecConfig, SEANetDecoderConfig, SEANetEncoderConfig};
pub use error::{ConfigError, Error, Result};
