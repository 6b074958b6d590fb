//! Stacked LSTM over the time axis with an identity skip.

use candle_core::{Result, Tensor};
use candle_nn::{LSTM, LSTMConfig, Module, RNN, VarBuilder};

/// `num_layers` LSTMs of width `dimension`, applied to `(batch, channels, time)`.
#[derive(Debug, Clone)]
pub struct SLstm {
    layers: Vec<LSTM>,
    dimension: usize,
}

impl SLstm {
    pub fn new(dimension: usize, num_layers: usize, vb: VarBuilder) -> Result<Self> {
        if num_layers == 0 {
            candle_core::bail!("SLstm needs at least one layer");
        }
        let vb = vb.pp("lstm");
        let layers = (0..num_layers)
            .map(|layer_idx| {
                let config = LSTMConfig {
                    layer_idx,
                    ..Default::default()
                };
                candle_nn::lstm(dimension, dimension, config, vb.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers, dimension })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Module for SLstm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        if xs.dim(2)? == 0 {
            return Ok(xs.clone());
        }
        // (B, C, T) -> (B, T, C), batch-first for candle's RNN
        let input = xs.transpose(1, 2)?.contiguous()?;
        let mut hidden = input.clone();
        for layer in &self.layers {
            let states = layer.seq(&hidden)?;
            hidden = layer.states_to_tensor(&states)?;
        }
        (hidden + input)?.transpose(1, 2)
    }
}
