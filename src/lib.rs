//! Lossless image compression with adaptive prediction and entropy coding
//!
//! Every sample is predicted from its causal neighborhood, the prediction
//! and an estimate of its uncertainty are turned into a discrete probability
//! distribution over all sample values, and the sample is coded against that
//! distribution. Encoder and decoder run the identical pipeline, so only the
//! coded symbols travel in the bitstream.

/// Coding sessions: header, sample layout and the per-pixel loop
pub mod codec;
/// Discrete probability distributions built from continuous laws
pub mod distribution;
/// Arithmetic and Rice-Golomb entropy coders over a bit queue
pub mod entropy;
/// Input/output operations, configuration and error handling
pub mod io;
/// Linear algebra and probability helpers
pub mod math;
/// Sample predictors and their variance estimators
pub mod prediction;
/// Structuring elements and causal contexts
pub mod spatial;

pub use io::error::{CodecError, Result};
