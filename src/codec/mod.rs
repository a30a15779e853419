//! Image coding sessions: sample layout, header and the per-pixel loop

pub mod coder;
pub mod header;
pub mod samples;

pub use coder::{Coder, PredictionMaps};
pub use header::{Header, HeaderCoder};
pub use samples::{ImageKind, RawImage, SampleDepth};
