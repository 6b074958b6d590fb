//! SEANet residual block: `shortcut(x) + [act, conv, act, conv](x)`.

use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

use super::activation::Activation;
use super::conv::{ConvOptions, SConv1d};

/// Residual unit with a channel-compressed branch (Demucs v3 style).
#[derive(Debug, Clone)]
pub struct SEANetResnetBlock {
    block: Vec<(Activation, SConv1d)>,
    shortcut: Option<SConv1d>,
    dim: usize,
}

impl SEANetResnetBlock {
    /// `kernel_sizes[i]` / `dilations[i]` describe the i-th conv of the branch.
    /// With `true_skip` the shortcut is a bare passthrough, otherwise a 1x1 conv.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim: usize,
        kernel_sizes: &[usize],
        dilations: &[usize],
        activation: Activation,
        opts: &ConvOptions,
        compress: usize,
        true_skip: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if kernel_sizes.len() != dilations.len() {
            candle_core::bail!(
                "number of kernel sizes ({}) must match number of dilations ({})",
                kernel_sizes.len(),
                dilations.len()
            );
        }
        let hidden = if compress == 0 { 0 } else { dim / compress };
        if hidden == 0 {
            candle_core::bail!("compress={compress} leaves no hidden channels for dim={dim}");
        }

        let last = kernel_sizes.len().saturating_sub(1);
        let block = kernel_sizes
            .iter()
            .zip(dilations)
            .enumerate()
            .map(|(i, (&kernel_size, &dilation))| {
                let in_chs = if i == 0 { dim } else { hidden };
                let out_chs = if i == last { dim } else { hidden };
                // Sequential index: activations sit at even slots, convs at odd ones
                let conv = SConv1d::new(
                    in_chs,
                    out_chs,
                    kernel_size,
                    1,
                    dilation,
                    opts,
                    vb.pp(format!("block.{}", 2 * i + 1)),
                )?;
                Ok((activation, conv))
            })
            .collect::<Result<Vec<_>>>()?;

        let shortcut = if true_skip {
            None
        } else {
            Some(SConv1d::new(dim, dim, 1, 1, 1, opts, vb.pp("shortcut"))?)
        };

        Ok(Self {
            block,
            shortcut,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn has_true_skip(&self) -> bool {
        self.shortcut.is_none()
    }
}

impl Module for SEANetResnetBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let residual = match &self.shortcut {
            Some(conv) => conv.forward(xs)?,
            None => xs.clone(),
        };
        let mut hidden = xs.clone();
        for (act, conv) in &self.block {
            hidden = act.forward(&hidden)?;
            hidden = conv.forward(&hidden)?;
        }
        residual + hidden
    }
}
