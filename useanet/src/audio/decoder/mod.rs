//! Latent -> waveform, with encoder skip fusion.

pub mod seanet;
pub mod skip;
