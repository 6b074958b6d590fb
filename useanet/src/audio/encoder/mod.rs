//! Waveform -> latent.

pub mod seanet;
