//! Numeric kernels used by prediction and distribution modelling

/// Cholesky and QR solvers for the regression normal equations
pub mod linalg;
/// Standardized Student's t distribution and smoothing kernels
pub mod probability;
