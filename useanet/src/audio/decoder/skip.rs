//! Skip-connection adapters fusing encoder activations into the decoder.

use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use crate::error::ConfigError;

/// How an encoder activation is merged into the decoder branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipConnectionType {
    /// Concatenate on channels, then project back to the decoder width.
    CatLinear,
    /// Project the encoder activation, scale by a learned scalar, add.
    ScaledSum,
}

impl SkipConnectionType {
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "cat_linear" => Ok(Self::CatLinear),
            "scaled_sum" => Ok(Self::ScaledSum),
            other => Err(ConfigError::UnknownSkipConnection(other.to_string()).into()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CatLinear => "cat_linear",
            Self::ScaledSum => "scaled_sum",
        }
    }
}

// ---------------------------------------------------------------------------
// ScaleLayer
// ---------------------------------------------------------------------------

/// Multiplies its input by a single learned scalar.
#[derive(Debug, Clone)]
pub struct ScaleLayer {
    scale: Tensor,
}

impl ScaleLayer {
    pub fn new(initial_scale: f64, vb: VarBuilder) -> Result<Self> {
        let scale = vb.get_with_hints((), "scale", Init::Const(initial_scale))?;
        Ok(Self { scale })
    }

    pub fn scale(&self) -> Result<f64> {
        self.scale.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()
    }
}

impl Module for ScaleLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_mul(&self.scale)
    }
}

// ---------------------------------------------------------------------------
// SkipAdapter
// ---------------------------------------------------------------------------

/// One fusion point: maps `(decoder, encoder)` activations to the decoder width.
#[derive(Debug, Clone)]
pub enum SkipAdapter {
    CatLinear {
        proj: Linear,
        decoder_width: usize,
        encoder_width: usize,
    },
    ScaledSum {
        proj: Linear,
        scale: ScaleLayer,
        decoder_width: usize,
        encoder_width: usize,
    },
}

impl SkipAdapter {
    pub fn new(
        kind: SkipConnectionType,
        decoder_width: usize,
        encoder_width: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match kind {
            SkipConnectionType::CatLinear => Self::CatLinear {
                proj: candle_nn::linear(decoder_width + encoder_width, decoder_width, vb)?,
                decoder_width,
                encoder_width,
            },
            // torch.nn.Sequential(Linear, ScaleLayer)
            SkipConnectionType::ScaledSum => Self::ScaledSum {
                proj: candle_nn::linear(encoder_width, decoder_width, vb.pp("0"))?,
                scale: ScaleLayer::new(0.0, vb.pp("1"))?,
                decoder_width,
                encoder_width,
            },
        })
    }

    pub fn kind(&self) -> SkipConnectionType {
        match self {
            Self::CatLinear { .. } => SkipConnectionType::CatLinear,
            Self::ScaledSum { .. } => SkipConnectionType::ScaledSum,
        }
    }

    /// Channel width of the decoder branch, which is also the output width.
    pub fn decoder_width(&self) -> usize {
        match self {
            Self::CatLinear { decoder_width, .. } | Self::ScaledSum { decoder_width, .. } => {
                *decoder_width
            }
        }
    }

    /// Channel width expected from the matched encoder activation.
    pub fn encoder_width(&self) -> usize {
        match self {
            Self::CatLinear { encoder_width, .. } | Self::ScaledSum { encoder_width, .. } => {
                *encoder_width
            }
        }
    }

    /// Merge `skip` (encoder side) into `xs` (decoder side), both `(B, C, T)`.
    pub fn fuse(&self, xs: &Tensor, skip: &Tensor) -> Result<Tensor> {
        let (_, dec_ch, dec_len) = xs.dims3()?;
        let (_, enc_ch, enc_len) = skip.dims3()?;
        if dec_ch != self.decoder_width() || enc_ch != self.encoder_width() {
            candle_core::bail!(
                "skip fusion expects {} decoder / {} encoder channels, got {dec_ch} / {enc_ch}",
                self.decoder_width(),
                self.encoder_width()
            );
        }
        if dec_len != enc_len {
            candle_core::bail!(
                "skip fusion time mismatch: decoder has {dec_len} frames, encoder has {enc_len}"
            );
        }

        match self {
            Self::CatLinear { proj, .. } => {
                let cat = Tensor::cat(&[xs, skip], 1)?.transpose(1, 2)?.contiguous()?;
                proj.forward(&cat)?.transpose(1, 2)?.contiguous()
            }
            Self::ScaledSum { proj, scale, .. } => {
                let skip = skip.transpose(1, 2)?.contiguous()?;
                let skip = scale.forward(&proj.forward(&skip)?)?;
                xs + skip.transpose(1, 2)?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn adapter(kind: SkipConnectionType, dec: usize, enc: usize, varmap: &VarMap) -> Result<SkipAdapter> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SkipAdapter::new(kind, dec, enc, vb)
    }

    #[test]
    fn test_skip_type_names() {
        assert_eq!(SkipConnectionType::from_name("cat_linear").unwrap(), SkipConnectionType::CatLinear);
        assert_eq!(SkipConnectionType::from_name("scaled_sum").unwrap().as_str(), "scaled_sum");
        let err = SkipConnectionType::from_name("concat").unwrap_err();
        assert!(err.to_string().contains("concat"));
    }

    #[test]
    fn test_cat_linear_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let a = adapter(SkipConnectionType::CatLinear, 16, 8, &varmap)?;
        let xs = Tensor::randn(0f32, 1.0, (2, 16, 5), &device)?;
        let skip = Tensor::randn(0f32, 1.0, (2, 8, 5), &device)?;
        assert_eq!(a.fuse(&xs, &skip)?.dims(), &[2, 16, 5]);
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.get("weight").map(|v| v.dims().to_vec()), Some(vec![16, 24]));
        assert_eq!(data.get("bias").map(|v| v.dims().to_vec()), Some(vec![16]));
        Ok(())
    }

    #[test]
    fn test_fused_output_feeds_reflect_conv() -> Result<()> {
        use crate::nn::{ConvOptions, SConv1d};

        let device = Device::Cpu;
        for kind in [SkipConnectionType::CatLinear, SkipConnectionType::ScaledSum] {
            let varmap = VarMap::new();
            let a = adapter(kind, 4, 4, &varmap)?;
            let xs = Tensor::randn(0f32, 1.0, (1, 4, 10), &device)?;
            let skip = Tensor::randn(0f32, 1.0, (1, 4, 10), &device)?;
            let fused = a.fuse(&xs, &skip)?;
            assert!(fused.is_contiguous(), "{kind:?}");

            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let conv = SConv1d::new(4, 1, 7, 1, 1, &ConvOptions::default(), vb.pp("out"))?;
            assert_eq!(conv.forward(&fused)?.dims(), &[1, 1, 10], "{kind:?}");
        }
        Ok(())
    }

    #[test]
    fn test_scaled_sum_starts_as_identity() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let a = adapter(SkipConnectionType::ScaledSum, 6, 12, &varmap)?;
        let xs = Tensor::randn(0f32, 1.0, (1, 6, 9), &device)?;
        let skip = Tensor::randn(0f32, 1.0, (1, 12, 9), &device)?;
        let ys = a.fuse(&xs, &skip)?;
        let diff = (ys - &xs)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        if let SkipAdapter::ScaledSum { scale, .. } = &a {
            assert_eq!(scale.scale()?, 0.0);
        }
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.get("0.weight").map(|v| v.dims().to_vec()), Some(vec![6, 12]));
        assert_eq!(data.get("1.scale").map(|v| v.dims().len()), Some(0));
        Ok(())
    }

    #[test]
    fn test_scale_layer_multiplies() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = ScaleLayer::new(0.5, vb)?;
        let x = Tensor::new(&[2f32, -4.0], &Device::Cpu)?;
        assert_eq!(layer.forward(&x)?.to_vec1::<f32>()?, vec![1.0, -2.0]);
        Ok(())
    }

    #[test]
    fn test_fuse_rejects_wrong_widths() -> Result<()> {
        let device = Device::Cpu;
        for kind in [SkipConnectionType::CatLinear, SkipConnectionType::ScaledSum] {
            let varmap = VarMap::new();
            let a = adapter(kind, 8, 8, &varmap)?;
            let xs = Tensor::zeros((1, 8, 4), DType::F32, &device)?;
            let skip = Tensor::zeros((1, 4, 4), DType::F32, &device)?;
            assert!(a.fuse(&xs, &skip).is_err(), "{kind:?}");
            let late = Tensor::zeros((1, 8, 3), DType::F32, &device)?;
            assert!(a.fuse(&xs, &late).is_err(), "{kind:?}");
        }
        Ok(())
    }
}
