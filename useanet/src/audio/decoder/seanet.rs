//! SEANet decoder: latent -> waveform, fusing encoder activations back in.

use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

use super::skip::{SkipAdapter, SkipConnectionType};
use crate::audio::encoder::seanet::SEANetEncoderOutput;
use crate::config::SEANetDecoderConfig;
use crate::nn::{Activation, SConv1d, SConvTranspose1d, SEANetResnetBlock, SLstm};

// ---------------------------------------------------------------------------
// Stage descriptor
// ---------------------------------------------------------------------------

/// One entry of the decoder stack, in execution order.
///
/// Stage `i` owns the parameters under `model.{i}`.
#[derive(Debug, Clone)]
pub enum DecoderStage {
    /// Stride-1 convolution: latent projection or output projection.
    Projection(SConv1d),
    Recurrent(SLstm),
    /// Stage nonlinearity, followed by the next skip fusion.
    Activation(Activation),
    /// Transposed convolution halving the channel width.
    Upsample(SConvTranspose1d),
    Residual(SEANetResnetBlock),
    /// Optional output bound. Never a fusion point.
    FinalActivation(Activation),
}

impl DecoderStage {
    pub fn is_fusion_point(&self) -> bool {
        matches!(self, Self::Activation(_))
    }
}

impl Module for DecoderStage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Projection(conv) => conv.forward(xs),
            Self::Recurrent(lstm) => lstm.forward(xs),
            Self::Activation(act) | Self::FinalActivation(act) => act.forward(xs),
            Self::Upsample(conv) => conv.forward(xs),
            Self::Residual(block) => block.forward(xs),
        }
    }
}

// ---------------------------------------------------------------------------
// SEANetDecoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SEANetDecoder {
    stages: Vec<DecoderStage>,
    /// One per fusion point, under `adaptation_layers.{i}`.
    adapters: Vec<SkipAdapter>,
    ratios: Vec<usize>,
    skip_connection_type: SkipConnectionType,
    channels: usize,
    dimension: usize,
}

impl SEANetDecoder {
    /// Validate `config`, then build the stack and its skip adapters.
    pub fn new(config: &SEANetDecoderConfig, vb: VarBuilder) -> crate::Result<Self> {
        let resolved = config.validate()?;
        let act = resolved.common.activation;
        let opts = resolved.common.conv;
        let kind = resolved.skip_connection_type;
        let (nf, nf_enc) = (config.n_filters, config.n_filters_encoder);

        let model_vb = vb.pp("model");
        let adapter_vb = vb.pp("adaptation_layers");
        let mut stages = Vec::new();
        let mut adapters = Vec::with_capacity(config.ratios.len() + 1);

        let mut mult = 1usize << config.ratios.len();
        stages.push(DecoderStage::Projection(SConv1d::new(
            config.dimension,
            mult * nf,
            config.kernel_size,
            1,
            1,
            &opts,
            model_vb.pp(stages.len()),
        )?));

        if config.lstm > 0 {
            stages.push(DecoderStage::Recurrent(SLstm::new(
                mult * nf,
                config.lstm,
                model_vb.pp(stages.len()),
            )?));
        }

        for &ratio in &config.ratios {
            stages.push(DecoderStage::Activation(act));
            adapters.push(SkipAdapter::new(
                kind,
                mult * nf,
                mult * nf_enc,
                adapter_vb.pp(adapters.len()),
            )?);
            stages.push(DecoderStage::Upsample(SConvTranspose1d::new(
                mult * nf,
                mult * nf / 2,
                ratio * 2,
                ratio,
                &opts,
                config.trim_right_ratio,
                model_vb.pp(stages.len()),
            )?));
            for j in 0..config.n_residual_layers {
                let dilation = config.dilation_base.pow(j as u32);
                stages.push(DecoderStage::Residual(SEANetResnetBlock::new(
                    mult * nf / 2,
                    &[config.residual_kernel_size, 1],
                    &[dilation, 1],
                    act,
                    &opts,
                    config.compress,
                    config.true_skip,
                    model_vb.pp(stages.len()),
                )?));
            }
            mult /= 2;
        }

        stages.push(DecoderStage::Activation(act));
        adapters.push(SkipAdapter::new(kind, nf, nf_enc, adapter_vb.pp(adapters.len()))?);
        stages.push(DecoderStage::Projection(SConv1d::new(
            nf,
            config.channels,
            config.last_kernel_size,
            1,
            1,
            &opts,
            model_vb.pp(stages.len()),
        )?));

        if let Some(final_act) = resolved.final_activation {
            stages.push(DecoderStage::FinalActivation(final_act));
        }

        debug_assert_eq!(
            stages.iter().filter(|s| s.is_fusion_point()).count(),
            adapters.len()
        );
        tracing::debug!(
            stages = stages.len(),
            adapters = adapters.len(),
            skip = kind.as_str(),
            hop_length = config.hop_length(),
            "built SEANet decoder"
        );

        Ok(Self {
            stages,
            adapters,
            ratios: config.ratios.clone(),
            skip_connection_type: kind,
            channels: config.channels,
            dimension: config.dimension,
        })
    }

    /// Decode `latent` using the encoder's captured `activations`.
    ///
    /// Fusion point `i` consumes `activations[len - 1 - i]`, i.e. captures are
    /// used in reverse order, coarsest first. Each capture must match the
    /// decoder branch in time, which holds when the encoded audio length is a
    /// multiple of [`hop_length`](Self::hop_length).
    pub fn decode(&self, latent: &Tensor, activations: &[Tensor]) -> Result<Tensor> {
        if activations.len() != self.adapters.len() {
            candle_core::bail!(
                "decoder has {} fusion points but received {} encoder activations",
                self.adapters.len(),
                activations.len()
            );
        }
        let (_, dimension, _) = latent.dims3()?;
        if dimension != self.dimension {
            candle_core::bail!(
                "decoder expects latent dimension {}, got {dimension}",
                self.dimension
            );
        }

        let last = activations.len() - 1;
        let mut fusion = 0;
        let mut x = latent.clone();
        for stage in &self.stages {
            x = stage.forward(&x)?;
            if stage.is_fusion_point() {
                x = self.adapters[fusion].fuse(&x, &activations[last - fusion])?;
                tracing::trace!(fusion, channels = x.dim(1)?, frames = x.dim(2)?, "fused skip");
                fusion += 1;
            }
        }
        Ok(x)
    }

    pub fn forward(&self, encoded: &SEANetEncoderOutput) -> Result<Tensor> {
        self.decode(&encoded.latent, &encoded.activations)
    }

    pub fn stages(&self) -> &[DecoderStage] {
        &self.stages
    }

    pub fn adapters(&self) -> &[SkipAdapter] {
        &self.adapters
    }

    pub fn num_adapters(&self) -> usize {
        self.adapters.len()
    }

    /// `(decoder_width, encoder_width)` at each fusion point, in fusion order.
    pub fn fusion_widths(&self) -> Vec<(usize, usize)> {
        self.adapters
            .iter()
            .map(|a| (a.decoder_width(), a.encoder_width()))
            .collect()
    }

    /// Strides in execution order (coarse to fine).
    pub fn ratios(&self) -> &[usize] {
        &self.ratios
    }

    pub fn hop_length(&self) -> usize {
        self.ratios.iter().product()
    }

    pub fn skip_connection_type(&self) -> SkipConnectionType {
        self.skip_connection_type
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
