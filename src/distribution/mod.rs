//! Discrete symbol distributions built from continuous laws
//!
//! A [`DistributionMaker`] sums weighted cumulative laws, usually a primary
//! law fitted to the prediction plus a small regularization law that keeps
//! every symbol codable.

pub mod functions;
pub mod maker;
pub mod sparse;

pub use functions::{CumulativeLaw, Law, LawParameters};
pub use maker::{Component, DistributionMaker, LazyElement};
pub use sparse::SparseLaw;
