//! Error types and context management for coding sessions

use std::fmt;
use std::path::PathBuf;

/// Main error type for all coding operations
#[derive(Debug)]
pub enum CodecError {
    /// Failed to load source image from filesystem
    ImageLoad {
        /// Path to the image file
        path: PathBuf,
        /// Underlying image loading error
        source: image::ImageError,
    },

    /// Failed to save a decoded image to disk
    ImageExport {
        /// Path where export was attempted
        path: PathBuf,
        /// Underlying image export error
        source: image::ImageError,
    },

    /// Sample data cannot be represented by the coder
    UnsupportedImage {
        /// Description of what's wrong with the image
        reason: String,
    },

    /// The discrete distribution assigned no probability to the coded symbol
    ///
    /// Always a modelling defect: the regularization component of the
    /// distribution must cover every symbol with a positive weight.
    ZeroProbability {
        /// Symbol that could not be coded
        symbol: u32,
        /// Sample position `[slice, row, col]`, when known
        position: Option<[usize; 3]>,
    },

    /// A weighting function produced weights below double precision resolution
    ResolutionExhausted {
        /// Name of the weighting that underflowed
        operation: &'static str,
    },

    /// Decoding tried to read past the end of the bitstream
    BitstreamUnderrun {
        /// Number of bits consumed before the failure
        consumed: usize,
        /// Sample position `[slice, row, col]`, when known
        position: Option<[usize; 3]>,
    },

    /// Entropy back end received a model it cannot use
    ModelMismatch {
        /// Name of the back end that rejected the model
        backend: &'static str,
    },

    /// Configuration parameter validation failed
    InvalidParameter {
        /// Name of the invalid parameter
        parameter: &'static str,
        /// Provided value that failed validation
        value: String,
        /// Explanation of why the value is invalid
        reason: String,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Numerical computation produced invalid result
    Computation {
        /// Name of the computation that failed
        operation: &'static str,
        /// Description of the failure
        reason: String,
    },
}

fn fmt_position(position: Option<[usize; 3]>) -> String {
    position.map_or_else(String::new, |[slice, row, col]| {
        format!(" at slice {slice}, row {row}, col {col}")
    })
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageLoad { path, source } => {
                write!(f, "Failed to load image '{}': {source}", path.display())
            }
            Self::ImageExport { path, source } => {
                write!(
                    f,
                    "Failed to export image to '{}': {source}",
                    path.display()
                )
            }
            Self::UnsupportedImage { reason } => {
                write!(f, "Unsupported image: {reason}")
            }
            Self::ZeroProbability { symbol, position } => {
                write!(
                    f,
                    "Symbol {symbol} has zero probability{}; strengthen the regularization distribution",
                    fmt_position(*position)
                )
            }
            Self::ResolutionExhausted { operation } => {
                write!(
                    f,
                    "Weights of {operation} vanished below double precision; lower the decay"
                )
            }
            Self::BitstreamUnderrun { consumed, position } => {
                write!(
                    f,
                    "Bitstream ended after {consumed} bits{}; the stream is truncated or was coded with a different configuration",
                    fmt_position(*position)
                )
            }
            Self::ModelMismatch { backend } => {
                write!(f, "The {backend} back end cannot code with this model")
            }
            Self::InvalidParameter {
                parameter,
                value,
                reason,
            } => {
                write!(f, "Invalid parameter '{parameter}' = '{value}': {reason}")
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
            Self::Computation { operation, reason } => {
                write!(f, "Computation error in {operation}: {reason}")
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageLoad { source, .. } | Self::ImageExport { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for coding results
pub type Result<T> = std::result::Result<T, CodecError>;

/// Additional context to enrich error messages
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Sample position `[slice, row, col]` being coded
    pub position: Option<[usize; 3]>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

/// Enriches error messages with coding state information
pub trait WithContext<T> {
    /// Add error context to a Result
    ///
    /// # Errors
    ///
    /// Propagates the original error with additional context applied
    fn with_context(self, context: ErrorContext) -> Result<T>;

    /// Add just the sample position
    ///
    /// # Errors
    ///
    /// Propagates the original error with the position applied
    fn at_position(self, position: [usize; 3]) -> Result<T>;
}

impl<T, E> WithContext<T> for std::result::Result<T, E>
where
    E: Into<CodecError>,
{
    fn with_context(self, context: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            let mut error = e.into();
            match &mut error {
                CodecError::ZeroProbability { position, .. }
                | CodecError::BitstreamUnderrun { position, .. } => {
                    if context.position.is_some() {
                        *position = context.position;
                    }
                }
                CodecError::Computation { operation, .. } => {
                    if let Some(op) = context.operation {
                        *operation = op;
                    }
                }
                _ => {}
            }
            error
        })
    }

    fn at_position(self, position: [usize; 3]) -> Result<T> {
        self.with_context(ErrorContext {
            position: Some(position),
            ..Default::default()
        })
    }
}

impl From<image::ImageError> for CodecError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageLoad {
            path: PathBuf::from("<unknown>"),
            source: err,
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: "unknown",
            source: err,
        }
    }
}

/// Create an invalid parameter error
pub fn invalid_parameter(
    parameter: &'static str,
    value: &impl ToString,
    reason: &impl ToString,
) -> CodecError {
    CodecError::InvalidParameter {
        parameter,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a computation error
pub fn computation_error(operation: &'static str, reason: &impl ToString) -> CodecError {
    CodecError::Computation {
        operation,
        reason: reason.to_string(),
    }
}

/// Create an unsupported image error
pub fn unsupported_image(reason: &impl ToString) -> CodecError {
    CodecError::UnsupportedImage {
        reason: reason.to_string(),
    }
}
