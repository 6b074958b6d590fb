//! SEANet encoder: waveform -> latent, capturing every stage activation.

use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

use crate::config::SEANetEncoderConfig;
use crate::nn::{Activation, SConv1d, SEANetResnetBlock, SLstm};

// ---------------------------------------------------------------------------
// Stage descriptor
// ---------------------------------------------------------------------------

/// One entry of the encoder stack, in execution order.
///
/// Stage `i` owns the parameters under `model.{i}`.
#[derive(Debug, Clone)]
pub enum EncoderStage {
    /// Stride-1 convolution: input projection or final latent projection.
    Projection(SConv1d),
    Residual(SEANetResnetBlock),
    /// Stage nonlinearity. Its output is captured for the decoder.
    Activation(Activation),
    /// Strided convolution doubling the channel width.
    Downsample(SConv1d),
    Recurrent(SLstm),
}

impl EncoderStage {
    pub fn is_capture_point(&self) -> bool {
        matches!(self, Self::Activation(_))
    }
}

impl Module for EncoderStage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Projection(conv) | Self::Downsample(conv) => conv.forward(xs),
            Self::Residual(block) => block.forward(xs),
            Self::Activation(act) => act.forward(xs),
            Self::Recurrent(lstm) => lstm.forward(xs),
        }
    }
}

// ---------------------------------------------------------------------------
// SEANetEncoder
// ---------------------------------------------------------------------------

/// Output of [`SEANetEncoder::forward`].
#[derive(Debug, Clone)]
pub struct SEANetEncoderOutput {
    /// `(batch, dimension, frames)`
    pub latent: Tensor,
    /// Outputs of every stage nonlinearity, fine to coarse.
    pub activations: Vec<Tensor>,
}

#[derive(Debug, Clone)]
pub struct SEANetEncoder {
    stages: Vec<EncoderStage>,
    /// Downsampling order (reverse of the configured list).
    ratios: Vec<usize>,
    activation_widths: Vec<usize>,
    channels: usize,
    dimension: usize,
}

impl SEANetEncoder {
    /// Validate `config`, then build the stack.
    pub fn new(config: &SEANetEncoderConfig, vb: VarBuilder) -> crate::Result<Self> {
        let resolved = config.validate()?;
        let act = resolved.activation;
        let opts = resolved.conv;
        let nf = config.n_filters;
        let ratios: Vec<usize> = config.ratios.iter().rev().copied().collect();

        let vb = vb.pp("model");
        let mut stages = Vec::new();
        let mut activation_widths = Vec::with_capacity(ratios.len() + 1);

        stages.push(EncoderStage::Projection(SConv1d::new(
            config.channels,
            nf,
            config.kernel_size,
            1,
            1,
            &opts,
            vb.pp(stages.len()),
        )?));

        let mut mult = 1;
        for &ratio in &ratios {
            for j in 0..config.n_residual_layers {
                let dilation = config.dilation_base.pow(j as u32);
                stages.push(EncoderStage::Residual(SEANetResnetBlock::new(
                    mult * nf,
                    &[config.residual_kernel_size, 1],
                    &[dilation, 1],
                    act,
                    &opts,
                    config.compress,
                    config.true_skip,
                    vb.pp(stages.len()),
                )?));
            }
            stages.push(EncoderStage::Activation(act));
            activation_widths.push(mult * nf);
            stages.push(EncoderStage::Downsample(SConv1d::new(
                mult * nf,
                mult * nf * 2,
                ratio * 2,
                ratio,
                1,
                &opts,
                vb.pp(stages.len()),
            )?));
            mult *= 2;
        }

        if config.lstm > 0 {
            stages.push(EncoderStage::Recurrent(SLstm::new(
                mult * nf,
                config.lstm,
                vb.pp(stages.len()),
            )?));
        }

        stages.push(EncoderStage::Activation(act));
        activation_widths.push(mult * nf);
        stages.push(EncoderStage::Projection(SConv1d::new(
            mult * nf,
            config.dimension,
            config.last_kernel_size,
            1,
            1,
            &opts,
            vb.pp(stages.len()),
        )?));

        tracing::debug!(
            stages = stages.len(),
            captures = activation_widths.len(),
            hop_length = config.hop_length(),
            causal = opts.causal,
            "built SEANet encoder"
        );

        Ok(Self {
            stages,
            ratios,
            activation_widths,
            channels: config.channels,
            dimension: config.dimension,
        })
    }

    /// Encode `(batch, channels, time)` audio.
    pub fn forward(&self, xs: &Tensor) -> Result<SEANetEncoderOutput> {
        let (_, channels, _) = xs.dims3()?;
        if channels != self.channels {
            candle_core::bail!(
                "encoder expects {} audio channels, got {channels}",
                self.channels
            );
        }
        let mut activations = Vec::with_capacity(self.activation_widths.len());
        let mut x = xs.clone();
        for stage in &self.stages {
            x = stage.forward(&x)?;
            if stage.is_capture_point() {
                activations.push(x.clone());
            }
        }
        Ok(SEANetEncoderOutput {
            latent: x,
            activations,
        })
    }

    pub fn stages(&self) -> &[EncoderStage] {
        &self.stages
    }

    /// Strides in execution order (fine to coarse).
    pub fn ratios(&self) -> &[usize] {
        &self.ratios
    }

    pub fn hop_length(&self) -> usize {
        self.ratios.iter().product()
    }

    /// Channel width of each captured activation, in capture order.
    pub fn activation_widths(&self) -> &[usize] {
        &self.activation_widths
    }

    pub fn num_activations(&self) -> usize {
        self.activation_widths.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
