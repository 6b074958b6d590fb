//! Audio autoencoder components.
//!
//! This module contains:
//! - `encoder`: SEANet encoder (waveform → latent + captured activations)
//! - `decoder`: SEANet decoder and skip adapters (latent + activations → waveform)
//! - `codec`: Validated encoder/decoder pair

pub mod codec;
pub mod decoder;
pub mod encoder;
