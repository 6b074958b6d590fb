//! Streamable 1D convolutions: automatic padding, causal mode, weight norm.
//!
//! Parameter layout follows the PyTorch module tree
//! `SConv1d.conv (NormConv1d) -> {conv (Conv1d), norm}` so exported checkpoints
//! load as-is.

use candle_core::{Result, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig, GroupNorm, Init, LayerNorm,
    Module, VarBuilder,
};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Normalization wrapped around a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    None,
    /// Weight reparametrized as `g * v / ||v||`.
    WeightNorm,
    /// LayerNorm over channels, applied after the convolution.
    LayerNorm,
    /// GroupNorm with a single group, applied after the convolution.
    TimeGroupNorm,
}

impl Norm {
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "weight_norm" => Ok(Self::WeightNorm),
            "layer_norm" => Ok(Self::LayerNorm),
            "time_group_norm" => Ok(Self::TimeGroupNorm),
            other => Err(ConfigError::UnknownNorm(other.to_string()).into()),
        }
    }
}

/// Padding policy at sequence boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Reflect,
    Replicate,
    Constant,
}

impl PadMode {
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "reflect" => Ok(Self::Reflect),
            "replicate" => Ok(Self::Replicate),
            "constant" | "zeros" => Ok(Self::Constant),
            other => Err(ConfigError::UnknownPadMode(other.to_string()).into()),
        }
    }
}

/// Options shared by every convolution of a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvOptions {
    pub norm: Norm,
    /// Epsilon for `LayerNorm` / `TimeGroupNorm`.
    pub norm_eps: f64,
    pub causal: bool,
    pub pad_mode: PadMode,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self {
            norm: Norm::WeightNorm,
            norm_eps: 1e-5,
            causal: false,
            pad_mode: PadMode::Reflect,
        }
    }
}

// ---------------------------------------------------------------------------
// Padding helpers
// ---------------------------------------------------------------------------

/// Pad the time axis of a `(batch, channels, time)` tensor.
///
/// Reflect padding also handles inputs no longer than the pad by zero-extending
/// first, reflecting, then dropping the zero tail again.
pub fn pad1d(xs: &Tensor, left: usize, right: usize, mode: PadMode) -> Result<Tensor> {
    if left == 0 && right == 0 {
        return Ok(xs.clone());
    }
    match mode {
        PadMode::Constant => xs.pad_with_zeros(2, left, right),
        PadMode::Replicate => xs.pad_with_same(2, left, right),
        PadMode::Reflect => {
            let length = xs.dim(2)?;
            let max_pad = left.max(right);
            if length <= max_pad {
                let extra = max_pad - length + 1;
                let extended = xs.pad_with_zeros(2, 0, extra)?;
                let padded = reflect_pad(&extended, left, right)?;
                let end = padded.dim(2)? - extra;
                padded.narrow(2, 0, end)
            } else {
                reflect_pad(xs, left, right)
            }
        }
    }
}

/// Mirror padding without repeating the edge sample. Requires `len > max(left, right)`.
fn reflect_pad(xs: &Tensor, left: usize, right: usize) -> Result<Tensor> {
    // index_select only takes contiguous inputs
    let xs = xs.contiguous()?;
    let length = xs.dim(2)?;
    let indices: Vec<u32> = (0..left)
        .map(|i| (left - i) as u32)
        .chain((0..length).map(|i| i as u32))
        .chain((0..right).map(|i| (length - 2 - i) as u32))
        .collect();
    let indices = Tensor::new(indices.as_slice(), xs.device())?;
    xs.index_select(&indices, 2)
}

/// Extra right padding so that the last window of a strided convolution is full.
pub fn extra_padding_for_conv1d(
    length: usize,
    kernel_size: usize,
    stride: usize,
    padding_total: usize,
) -> usize {
    let n_frames =
        (length as f64 - kernel_size as f64 + padding_total as f64) / stride as f64 + 1.0;
    let ideal_length =
        (n_frames.ceil() as i64 - 1) * stride as i64 + (kernel_size as i64 - padding_total as i64);
    (ideal_length - length as i64).max(0) as usize
}

// ---------------------------------------------------------------------------
// Parameter loading
// ---------------------------------------------------------------------------

/// Load a `(d0, d1, kernel)` kernel, folding weight norm into a plain weight.
fn load_kernel(shape: (usize, usize, usize), norm: Norm, vb: &VarBuilder) -> Result<Tensor> {
    let init = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    if norm == Norm::WeightNorm {
        let weight_g = vb.get_with_hints((shape.0, 1, 1), "weight_g", Init::Const(1.0))?;
        let weight_v = vb.get_with_hints(shape, "weight_v", init)?;
        let norm_v = weight_v.sqr()?.sum_keepdim((1, 2))?.sqrt()?;
        weight_v.broadcast_mul(&weight_g)?.broadcast_div(&norm_v)
    } else {
        vb.get_with_hints(shape, "weight", init)
    }
}

/// Post-convolution normalization over the channel axis.
#[derive(Debug, Clone)]
enum ChannelNorm {
    None,
    Layer(LayerNorm),
    Group(GroupNorm),
}

impl ChannelNorm {
    fn new(opts: &ConvOptions, channels: usize, vb: VarBuilder) -> Result<Self> {
        if opts.causal && opts.norm == Norm::TimeGroupNorm {
            candle_core::bail!("time_group_norm mixes future samples and cannot be causal");
        }
        Ok(match opts.norm {
            Norm::None | Norm::WeightNorm => Self::None,
            Norm::LayerNorm => Self::Layer(candle_nn::layer_norm(channels, opts.norm_eps, vb)?),
            Norm::TimeGroupNorm => {
                Self::Group(candle_nn::group_norm(1, channels, opts.norm_eps, vb)?)
            }
        })
    }
}

impl Module for ChannelNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::None => Ok(xs.clone()),
            // (B, C, T) -> (B, T, C) -> norm -> (B, C, T)
            Self::Layer(ln) => ln.forward(&xs.transpose(1, 2)?)?.transpose(1, 2),
            Self::Group(gn) => gn.forward(xs),
        }
    }
}

// ---------------------------------------------------------------------------
// SConv1d
// ---------------------------------------------------------------------------

/// Conv1d with normalization and padding that keeps `out_len = ceil(len / stride)`.
#[derive(Debug, Clone)]
pub struct SConv1d {
    conv: Conv1d,
    norm: ChannelNorm,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    causal: bool,
    pad_mode: PadMode,
}

impl SConv1d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
        opts: &ConvOptions,
        vb: VarBuilder,
    ) -> Result<Self> {
        // SConv1d.conv is a NormConv1d holding .conv and .norm
        let vb = vb.pp("conv");
        let conv_vb = vb.pp("conv");
        let weight = load_kernel((out_channels, in_channels, kernel_size), opts.norm, &conv_vb)?;
        let bias = conv_vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;
        let config = Conv1dConfig {
            padding: 0,
            stride,
            dilation,
            groups: 1,
            ..Default::default()
        };
        let conv = Conv1d::new(weight, Some(bias), config);
        let norm = ChannelNorm::new(opts, out_channels, vb.pp("norm"))?;
        Ok(Self {
            conv,
            norm,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            dilation,
            causal: opts.causal,
            pad_mode: opts.pad_mode,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Padding `(left, right)` applied to an input of `length` samples.
    pub fn padding_for(&self, length: usize) -> (usize, usize) {
        let kernel_size = (self.kernel_size - 1) * self.dilation + 1;
        let padding_total = kernel_size.saturating_sub(self.stride);
        let extra = extra_padding_for_conv1d(length, kernel_size, self.stride, padding_total);
        if self.causal {
            (padding_total, extra)
        } else {
            let right = padding_total / 2;
            (padding_total - right, right + extra)
        }
    }
}

impl Module for SConv1d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (left, right) = self.padding_for(xs.dim(2)?);
        let xs = pad1d(xs, left, right, self.pad_mode)?;
        let ys = self.conv.forward(&xs)?;
        self.norm.forward(&ys)
    }
}

// ---------------------------------------------------------------------------
// SConvTranspose1d
// ---------------------------------------------------------------------------

/// ConvTranspose1d that trims `kernel - stride` samples so `out_len = len * stride`.
#[derive(Debug, Clone)]
pub struct SConvTranspose1d {
    conv: ConvTranspose1d,
    norm: ChannelNorm,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    causal: bool,
    trim_right_ratio: f64,
}

impl SConvTranspose1d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        opts: &ConvOptions,
        trim_right_ratio: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&trim_right_ratio) {
            candle_core::bail!("trim_right_ratio must be in [0, 1], got {trim_right_ratio}");
        }
        if !opts.causal && trim_right_ratio != 1.0 {
            candle_core::bail!("trim_right_ratio only applies to causal convolutions");
        }
        let vb = vb.pp("convtr");
        let conv_vb = vb.pp("convtr");
        let weight = load_kernel((in_channels, out_channels, kernel_size), opts.norm, &conv_vb)?;
        let bias = conv_vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;
        let config = ConvTranspose1dConfig {
            padding: 0,
            output_padding: 0,
            stride,
            dilation: 1,
            groups: 1,
        };
        let conv = ConvTranspose1d::new(weight, Some(bias), config);
        let norm = ChannelNorm::new(opts, out_channels, vb.pp("norm"))?;
        Ok(Self {
            conv,
            norm,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            causal: opts.causal,
            trim_right_ratio,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Samples `(left, right)` removed from the raw transposed-conv output.
    pub fn trim(&self) -> (usize, usize) {
        let padding_total = self.kernel_size.saturating_sub(self.stride);
        let right = if self.causal {
            (padding_total as f64 * self.trim_right_ratio).ceil() as usize
        } else {
            padding_total / 2
        };
        (padding_total - right, right)
    }
}

impl Module for SConvTranspose1d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = self.conv.forward(xs)?;
        let ys = self.norm.forward(&ys)?;
        let (left, right) = self.trim();
        let length = ys.dim(2)?;
        ys.narrow(2, left, length - left - right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn opts(norm: Norm, causal: bool, pad_mode: PadMode) -> ConvOptions {
        ConvOptions {
            norm,
            norm_eps: 1e-5,
            causal,
            pad_mode,
        }
    }

    #[test]
    fn test_norm_and_pad_mode_names() {
        assert_eq!(Norm::from_name("weight_norm").unwrap(), Norm::WeightNorm);
        assert_eq!(Norm::from_name("time_group_norm").unwrap(), Norm::TimeGroupNorm);
        assert!(Norm::from_name("spectral_norm").is_err());
        assert_eq!(PadMode::from_name("zeros").unwrap(), PadMode::Constant);
        assert!(PadMode::from_name("circular").is_err());
    }

    #[test]
    fn test_reflect_pad_values() -> Result<()> {
        let x = Tensor::new(&[[[1f32, 2., 3., 4.]]], &Device::Cpu)?;
        let y = pad1d(&x, 2, 2, PadMode::Reflect)?;
        assert_eq!(y.flatten_all()?.to_vec1::<f32>()?, vec![3., 2., 1., 2., 3., 4., 3., 2.]);
        Ok(())
    }

    #[test]
    fn test_reflect_pad_short_input() -> Result<()> {
        // length 2 with pad 3: zero-extend to 4, reflect, drop the 2 extra samples
        let x = Tensor::new(&[[[1f32, 2.]]], &Device::Cpu)?;
        let y = pad1d(&x, 3, 3, PadMode::Reflect)?;
        assert_eq!(y.flatten_all()?.to_vec1::<f32>()?, vec![0., 0., 2., 1., 2., 0., 0., 0.]);
        Ok(())
    }

    #[test]
    fn test_reflect_pad_strided_input() -> Result<()> {
        let x = Tensor::new(&[[[1f32, 2., 3., 4.], [5., 6., 7., 8.]]], &Device::Cpu)?;
        // (B, T, C) laid out, viewed back as (B, C, T)
        let strided = x.transpose(1, 2)?.contiguous()?.transpose(1, 2)?;
        assert!(!strided.is_contiguous());
        let y = pad1d(&strided, 1, 1, PadMode::Reflect)?;
        assert_eq!(
            y.to_vec3::<f32>()?,
            vec![vec![vec![2., 1., 2., 3., 4., 3.], vec![6., 5., 6., 7., 8., 7.]]]
        );
        Ok(())
    }

    #[test]
    fn test_sconv1d_accepts_strided_input() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = SConv1d::new(3, 5, 7, 1, 1, &ConvOptions::default(), vb)?;
        let x = Tensor::randn(0f32, 1.0, (2, 11, 3), &device)?.transpose(1, 2)?;
        assert!(!x.is_contiguous());
        let y = conv.forward(&x)?;
        let expected = conv.forward(&x.contiguous()?)?;
        assert_eq!(y.dims(), &[2, 5, 11]);
        let diff = (y - expected)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_causal_time_group_norm_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = SConv1d::new(2, 2, 3, 1, 1, &opts(Norm::TimeGroupNorm, true, PadMode::Constant), vb);
        assert!(conv.is_err());
    }

    #[test]
    fn test_replicate_and_constant_pad() -> Result<()> {
        let x = Tensor::new(&[[[1f32, 2.]]], &Device::Cpu)?;
        let y = pad1d(&x, 1, 2, PadMode::Replicate)?;
        assert_eq!(y.flatten_all()?.to_vec1::<f32>()?, vec![1., 1., 2., 2., 2.]);
        let y = pad1d(&x, 1, 0, PadMode::Constant)?;
        assert_eq!(y.flatten_all()?.to_vec1::<f32>()?, vec![0., 1., 2.]);
        Ok(())
    }

    #[test]
    fn test_extra_padding() {
        // kernel 4, stride 2, total padding 2
        assert_eq!(extra_padding_for_conv1d(10, 4, 2, 2), 0);
        assert_eq!(extra_padding_for_conv1d(11, 4, 2, 2), 1);
        // stride 1 never needs extra padding
        assert_eq!(extra_padding_for_conv1d(7, 7, 1, 6), 0);
    }

    #[test]
    fn test_sconv1d_output_length() -> Result<()> {
        let device = Device::Cpu;
        for causal in [false, true] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let conv = SConv1d::new(4, 8, 8, 4, 1, &opts(Norm::WeightNorm, causal, PadMode::Reflect), vb)?;
            for len in [16, 17, 30] {
                let x = Tensor::randn(0f32, 1.0, (2, 4, len), &device)?;
                let y = conv.forward(&x)?;
                assert_eq!(y.dims(), &[2, 8, len.div_ceil(4)], "causal={causal} len={len}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_sconv1d_dilated_keeps_length() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = SConv1d::new(4, 4, 3, 1, 4, &opts(Norm::None, false, PadMode::Reflect), vb)?;
        assert_eq!(conv.padding_for(20), (4, 4));
        let x = Tensor::randn(0f32, 1.0, (1, 4, 20), &device)?;
        assert_eq!(conv.forward(&x)?.dims(), &[1, 4, 20]);
        Ok(())
    }

    #[test]
    fn test_sconv1d_causal_pads_left_only() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = SConv1d::new(1, 1, 7, 1, 1, &opts(Norm::None, true, PadMode::Constant), vb)?;
        assert_eq!(conv.padding_for(50), (6, 0));
        Ok(())
    }

    #[test]
    fn test_sconv1d_causal_ignores_future() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = SConv1d::new(1, 2, 5, 1, 1, &opts(Norm::WeightNorm, true, PadMode::Constant), vb)?;
        let x = Tensor::randn(0f32, 1.0, (1, 1, 12), &device)?;
        let future = Tensor::randn(0f32, 1.0, (1, 1, 4), &device)?;
        let head = x.narrow(2, 0, 8)?;
        let altered = Tensor::cat(&[&head, &future], 2)?;
        let a = conv.forward(&x)?.narrow(2, 0, 8)?;
        let b = conv.forward(&altered)?.narrow(2, 0, 8)?;
        let diff = (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert!(diff < 1e-6, "causal conv leaked future samples: {diff}");
        Ok(())
    }

    #[test]
    fn test_weight_norm_parameter_names() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = SConv1d::new(2, 3, 3, 1, 1, &ConvOptions::default(), vb)?;
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("conv.conv.weight_g"));
        assert!(data.contains_key("conv.conv.weight_v"));
        assert!(data.contains_key("conv.conv.bias"));
        assert!(!data.contains_key("conv.conv.weight"));
        Ok(())
    }

    #[test]
    fn test_weight_norm_folds_to_unit_norm() -> Result<()> {
        // g = 1 at init, so every output filter has unit L2 norm
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = load_kernel((3, 2, 4), Norm::WeightNorm, &vb)?;
        let norms = w.sqr()?.sum_keepdim((1, 2))?.sqrt()?.flatten_all()?.to_vec1::<f32>()?;
        for n in norms {
            assert!((n - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_channel_norms_keep_shape() -> Result<()> {
        let device = Device::Cpu;
        for norm in [Norm::LayerNorm, Norm::TimeGroupNorm] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let conv = SConv1d::new(3, 6, 3, 1, 1, &opts(norm, false, PadMode::Replicate), vb)?;
            let x = Tensor::randn(0f32, 1.0, (2, 3, 9), &device)?;
            assert_eq!(conv.forward(&x)?.dims(), &[2, 6, 9]);
            let data = varmap.data().lock().unwrap();
            assert!(data.contains_key("conv.norm.weight"), "{norm:?}");
            assert!(data.contains_key("conv.conv.weight"), "{norm:?}");
        }
        Ok(())
    }

    #[test]
    fn test_sconv_transpose1d_output_length() -> Result<()> {
        let device = Device::Cpu;
        for (causal, ratio) in [(false, 1.0), (true, 1.0), (true, 0.5), (true, 0.0)] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let conv = SConvTranspose1d::new(
                8,
                4,
                10,
                5,
                &opts(Norm::WeightNorm, causal, PadMode::Reflect),
                ratio,
                vb,
            )?;
            let x = Tensor::randn(0f32, 1.0, (1, 8, 7), &device)?;
            assert_eq!(conv.forward(&x)?.dims(), &[1, 4, 35]);
        }
        Ok(())
    }

    #[test]
    fn test_sconv_transpose1d_trim_split() -> Result<()> {
        let device = Device::Cpu;
        let build = |causal: bool, ratio: f64| -> Result<SConvTranspose1d> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            SConvTranspose1d::new(2, 2, 8, 3, &opts(Norm::None, causal, PadMode::Reflect), ratio, vb)
        };
        // padding_total = 5
        assert_eq!(build(false, 1.0)?.trim(), (3, 2));
        assert_eq!(build(true, 1.0)?.trim(), (0, 5));
        assert_eq!(build(true, 0.5)?.trim(), (2, 3));
        assert_eq!(build(true, 0.0)?.trim(), (5, 0));
        Ok(())
    }

    #[test]
    fn test_sconv_transpose1d_rejects_bad_trim_ratio() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let non_causal = opts(Norm::None, false, PadMode::Reflect);
        assert!(SConvTranspose1d::new(2, 2, 4, 2, &non_causal, 0.5, vb.clone()).is_err());
        let causal = opts(Norm::None, true, PadMode::Reflect);
        assert!(SConvTranspose1d::new(2, 2, 4, 2, &causal, 1.5, vb).is_err());
    }

    #[test]
    fn test_transpose_parameter_names() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = SConvTranspose1d::new(4, 2, 4, 2, &ConvOptions::default(), 1.0, vb)?;
        let data = varmap.data().lock().unwrap();
        assert_eq!(data.get("convtr.convtr.weight_v").map(|v| v.dims().to_vec()), Some(vec![4, 2, 4]));
        assert_eq!(data.get("convtr.convtr.weight_g").map(|v| v.dims().to_vec()), Some(vec![4, 1, 1]));
        Ok(())
    }
}
