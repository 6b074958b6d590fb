//! Paired SEANet encoder + decoder.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::audio::decoder::seanet::SEANetDecoder;
use crate::audio::encoder::seanet::{SEANetEncoder, SEANetEncoderOutput};
use crate::config::SEANetCodecConfig;

/// Complete autoencoder: weights live under `encoder.*` and `decoder.*`.
#[derive(Debug, Clone)]
pub struct SEANetCodec {
    encoder: SEANetEncoder,
    decoder: SEANetDecoder,
    config: SEANetCodecConfig,
}

impl SEANetCodec {
    /// Check the encoder/decoder contract, then build both halves.
    pub fn new(config: &SEANetCodecConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;
        let encoder = SEANetEncoder::new(&config.encoder, vb.pp("encoder"))?;
        let decoder = SEANetDecoder::new(&config.decoder, vb.pp("decoder"))?;

        tracing::debug!(
            hop_length = encoder.hop_length(),
            captures = encoder.num_activations(),
            skip = decoder.skip_connection_type().as_str(),
            "built SEANet codec"
        );

        Ok(Self {
            encoder,
            decoder,
            config: config.clone(),
        })
    }

    /// Load weights from one or more safetensors files.
    pub fn from_safetensors<P: AsRef<Path>>(
        config: &SEANetCodecConfig,
        paths: &[P],
        dtype: DType,
        device: &Device,
    ) -> crate::Result<Self> {
        // Validate before touching the files.
        config.validate()?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
        tracing::debug!(files = paths.len(), ?dtype, "loading SEANet codec weights");
        Self::new(config, vb)
    }

    /// `(B, channels, T)` -> latent and captured activations.
    pub fn encode(&self, audio: &Tensor) -> candle_core::Result<SEANetEncoderOutput> {
        self.encoder.forward(audio)
    }

    /// Needs activations from audio whose length is a multiple of
    /// [`hop_length`](Self::hop_length); otherwise the skip fusion fails on a
    /// time-length mismatch.
    pub fn decode(&self, encoded: &SEANetEncoderOutput) -> candle_core::Result<Tensor> {
        self.decoder.forward(encoded)
    }

    /// Encode then decode. `T` must be a multiple of the hop length, and the
    /// output then has the input's shape. Other lengths are an error.
    pub fn forward(&self, audio: &Tensor) -> candle_core::Result<Tensor> {
        self.decode(&self.encode(audio)?)
    }

    pub fn encoder(&self) -> &SEANetEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &SEANetDecoder {
        &self.decoder
    }

    pub fn config(&self) -> &SEANetCodecConfig {
        &self.config
    }

    pub fn hop_length(&self) -> usize {
        self.encoder.hop_length()
    }

    /// Latent frames produced for `num_samples` input samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        self.encoder
            .ratios()
            .iter()
            .fold(num_samples, |len, &stride| len.div_ceil(stride))
    }
}
