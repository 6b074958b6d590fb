//! Streamable building blocks shared by the SEANet encoder and decoder.

pub mod activation;
pub mod conv;
pub mod lstm;
pub mod resnet;

pub use activation::Activation;
pub use conv::{ConvOptions, Norm, PadMode, SConv1d, SConvTranspose1d};
pub use lstm::SLstm;
pub use resnet::SEANetResnetBlock;
