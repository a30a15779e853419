//! Input/output collaborators around the coding engine

/// Command-line interface and file processing
pub mod cli;
/// Coder parameters and their defaults
pub mod configuration;
/// Error types shared by the whole crate
pub mod error;
/// Conversion between image files and sample arrays
pub mod image;
/// Progress reporting for long coding sessions
pub mod progress;
