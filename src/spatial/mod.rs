//! Causal neighborhood shapes and their binding to an image
//!
//! This module contains:
//! - Structuring elements describing neighborhoods and training regions
//! - The border-aware context that extracts feature vectors from an image

/// Structuring elements and their construction helpers
pub mod element;
/// Context binding neighborhoods and training regions to one image
pub mod context;

pub use context::Context;
pub use element::StructuringElement;

/// Sample coordinate `[slice, row, col]`
pub type Position = [usize; 3];
