//! Command-line interface for encoding and decoding image files

use crate::codec::{Coder, ImageKind, RawImage};
use crate::io::configuration::{
    BackendKind, BorderSplit, CoderConfig, DistributionKind, InterChannel, NlmDistance,
    PredictorKind, Radii, Solver, VarianceKind, WlsVarianceEquation, WlsWeighting,
};
use crate::io::error::{CodecError, Result, computation_error, invalid_parameter};
use crate::io::image::{RawDimensions, load_image, load_raw, save_image, save_raw};
use crate::io::progress::CodingProgress;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pixelfit")]
#[command(
    author,
    version,
    about = "Lossless image compression with adaptive prediction"
)]
/// Command-line arguments for the codec
pub struct Cli {
    /// Operation to run
    #[command(subcommand)]
    pub command: Command,

    /// Coder parameters; decoding needs the values used for encoding
    #[command(flatten)]
    pub options: CoderOptions,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log more details (repeat for debug output)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Operations offered on the command line
#[derive(Subcommand)]
pub enum Command {
    /// Compress an image into a bitstream
    Encode {
        /// Source image, or a headerless volume with `--dimensions`
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        /// Destination bitstream
        #[arg(value_name = "BITSTREAM")]
        bitstream: PathBuf,
        /// Read IMAGE as a headerless volume of BITSxWIDTHxHEIGHTxDEPTH samples
        #[arg(short, long)]
        dimensions: Option<RawDimensions>,
    },
    /// Restore an image from a bitstream
    Decode {
        /// Source bitstream
        #[arg(value_name = "BITSTREAM")]
        bitstream: PathBuf,
        /// Destination file, PNG for gray and color images, headerless for volumes
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Encode and decode in memory, then verify both match
    Roundtrip {
        /// Source image, or a headerless volume with `--dimensions`
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        /// Read IMAGE as a headerless volume of BITSxWIDTHxHEIGHTxDEPTH samples
        #[arg(short, long)]
        dimensions: Option<RawDimensions>,
    },
}

/// Overrides of [`CoderConfig`] fields, unset options keep their defaults
#[derive(Args, Debug, Default, Clone)]
pub struct CoderOptions {
    /// Predictor: MEAN, MED, NLM, LS, WLS or FASTLS
    #[arg(long, global = true)]
    pub predictor: Option<PredictorKind>,

    /// Variance estimator: EXPONENTIAL, RESIDUAL or LS
    #[arg(long, global = true)]
    pub variance: Option<VarianceKind>,

    /// Distribution: NORMAL, LAPLACE, T or UNIFORM
    #[arg(long, global = true)]
    pub distribution: Option<DistributionKind>,

    /// Regularization distribution: NORMAL, LAPLACE or UNIFORM
    #[arg(long, global = true)]
    pub regularization: Option<DistributionKind>,

    /// Entropy back end: ARITHMETIC or GOLOMB
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Neighborhood radii as TOP,LEFT,RIGHT,BOTTOM,FRONT
    #[arg(long, global = true, value_delimiter = ',')]
    pub neighborhood: Option<Vec<f64>>,

    /// Training region half-extent in the image plane
    #[arg(long, global = true)]
    pub training_size: Option<usize>,

    /// Training region extent into past slices
    #[arg(long, global = true)]
    pub training_size_3d: Option<usize>,

    /// Radius of the residual variance window
    #[arg(long, global = true)]
    pub variance_radius: Option<f64>,

    /// Never transpose images before coding
    #[arg(long, global = true)]
    pub no_transposition: bool,

    /// Largest width or height
    #[arg(long, global = true)]
    pub max_image_size: Option<u32>,

    /// Inter-channel prediction: OFF, COLOCATED or FORWARD
    #[arg(long, global = true)]
    pub inter_channel: Option<InterChannel>,

    /// WLS variance equation: PLAIN or SQUARED
    #[arg(long, global = true)]
    pub wls_variance_equation: Option<WlsVarianceEquation>,

    /// Radius of a separate matching neighborhood, 0 disables it
    #[arg(long, global = true)]
    pub matching_neighborhood: Option<f64>,

    /// Keep only this many highest-weight training vectors, 0 keeps all
    #[arg(long, global = true)]
    pub max_training_vectors: Option<usize>,

    /// Regression solver: CHOLESKY or QR
    #[arg(long, global = true)]
    pub solver: Option<Solver>,

    /// Ridge at border pixels, 0 disables regularization
    #[arg(long, global = true)]
    pub border_regularization: Option<f64>,

    /// Ridge at interior pixels
    #[arg(long, global = true)]
    pub inner_regularization: Option<f64>,

    /// Recompute neighborhood vectors instead of memoizing them
    #[arg(long, global = true)]
    pub no_neighborhood_buffer: bool,

    /// Sparsification strength, 0 disables it
    #[arg(long, global = true)]
    pub sparsify: Option<f64>,

    /// Radius of the sparsification context
    #[arg(long, global = true)]
    pub sparsification_size: Option<f64>,

    /// Cap on the bits one sample may cost
    #[arg(long, global = true)]
    pub max_bits_per_pixel: Option<u32>,

    /// Ratio between primary and regularization densities
    #[arg(long, global = true)]
    pub regularization_ratio: Option<f64>,

    /// Border protrusion split as TOP,LEFT,RIGHT,BOTTOM,FRONT
    #[arg(long, global = true, value_delimiter = ',')]
    pub border_split: Option<Vec<u32>>,

    /// Decay of the NLM weighting
    #[arg(long, global = true)]
    pub nlm_decay: Option<f64>,

    /// NLM distance: SAD or SSD
    #[arg(long, global = true)]
    pub nlm_distance: Option<NlmDistance>,

    /// WLS training weights: DISTANCE or CORRELATION
    #[arg(long, global = true)]
    pub wls_weighting: Option<WlsWeighting>,
}

fn five<T: Copy + std::fmt::Debug>(parameter: &'static str, values: &[T]) -> Result<[T; 5]> {
    <[T; 5]>::try_from(values)
        .map_err(|e| invalid_parameter(parameter, &format!("{values:?}"), &e))
}

impl CoderOptions {
    /// Default configuration with every given option applied
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameter`] if a list option does not
    /// hold exactly five values
    pub fn to_config(&self) -> Result<CoderConfig> {
        let mut config = CoderConfig::default();
        macro_rules! apply {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })+
            };
        }
        apply!(
            predictor,
            variance,
            distribution,
            regularization,
            backend,
            training_size,
            training_size_3d,
            variance_radius,
            max_image_size,
            inter_channel,
            wls_variance_equation,
            matching_neighborhood,
            max_training_vectors,
            solver,
            border_regularization,
            inner_regularization,
            sparsify,
            sparsification_size,
            max_bits_per_pixel,
            regularization_ratio,
            nlm_decay,
            nlm_distance,
            wls_weighting,
        );
        if let Some(radii) = &self.neighborhood {
            config.neighborhood = Radii::from_array(five("neighborhood", radii)?);
        }
        if let Some(split) = &self.border_split {
            let [top, left, right, bottom, front] = five("border_split", split)?;
            config.border_split = BorderSplit {
                top,
                left,
                right,
                bottom,
                front,
            };
        }
        config.adaptive_transposition &= !self.no_transposition;
        config.neighborhood_buffer &= !self.no_neighborhood_buffer;
        Ok(config)
    }
}

impl Cli {
    /// Check if progress should be displayed
    pub const fn should_show_progress(&self) -> bool {
        !self.quiet
    }

    /// Log filter matching the verbosity flags
    pub const fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        }
    }
}

/// Runs the requested operation on files
pub struct FileProcessor {
    cli: Cli,
}

impl FileProcessor {
    /// Create a new file processor with the given CLI arguments
    pub const fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the command given on the command line
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a file cannot be
    /// read or written, coding fails, or a roundtrip does not reproduce
    /// its input
    pub fn process(&self) -> Result<()> {
        let coder = self.coder()?;
        match &self.cli.command {
            Command::Encode {
                image,
                bitstream,
                dimensions,
            } => {
                let raw = Self::load(image, *dimensions)?;
                let start_time = Instant::now();
                let bytes = coder.encode(&raw)?;
                report(&raw, &bytes, start_time);
                std::fs::write(bitstream, &bytes).map_err(|source| CodecError::FileSystem {
                    path: bitstream.clone(),
                    operation: "write bitstream",
                    source,
                })
            }
            Command::Decode { bitstream, image } => {
                let bytes = std::fs::read(bitstream).map_err(|source| CodecError::FileSystem {
                    path: bitstream.clone(),
                    operation: "read bitstream",
                    source,
                })?;
                let start_time = Instant::now();
                let raw = coder.decode(&bytes)?;
                info!(
                    "decoded {} image of {} samples in {:.2?}",
                    raw.kind(),
                    raw.len(),
                    start_time.elapsed()
                );
                Self::save(&raw, image)
            }
            Command::Roundtrip { image, dimensions } => {
                let raw = Self::load(image, *dimensions)?;
                let start_time = Instant::now();
                let bytes = coder.encode(&raw)?;
                report(&raw, &bytes, start_time);
                let decoded = coder.decode(&bytes)?;
                if decoded.kind() != raw.kind() || decoded.samples() != raw.samples() {
                    return Err(computation_error(
                        "roundtrip",
                        &format!("decoding {} does not reproduce it", image.display()),
                    ));
                }
                info!("roundtrip of {} verified", image.display());
                Ok(())
            }
        }
    }

    fn coder(&self) -> Result<Coder> {
        let config = self.cli.options.to_config()?;
        debug!("coder configuration: {config:?}");
        let progress = if self.cli.should_show_progress() {
            CodingProgress::visible()
        } else {
            CodingProgress::hidden()
        };
        Ok(Coder::new(config)?.with_progress(progress))
    }

    fn load(path: &Path, dimensions: Option<RawDimensions>) -> Result<RawImage> {
        match dimensions {
            Some(dimensions) => load_raw(path, dimensions),
            None => load_image(path),
        }
    }

    fn save(image: &RawImage, path: &Path) -> Result<()> {
        match image.kind() {
            ImageKind::Volume => save_raw(image, path),
            ImageKind::Gray | ImageKind::Color => save_image(image, path),
        }
    }
}

fn report(image: &RawImage, bytes: &[u8], start_time: Instant) {
    let bits = bytes.len() * 8;
    info!(
        "{bits} bits for {} samples ({:.4} bits per sample) in {:.2?}",
        image.len(),
        bits as f64 / image.len().max(1) as f64,
        start_time.elapsed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_override_defaults() -> Result<()> {
        let cli = Cli::try_parse_from([
            "pixelfit",
            "--predictor",
            "med",
            "--neighborhood",
            "1.5,1.5,0.5,0,0",
            "--backend",
            "golomb",
            "--no-transposition",
            "roundtrip",
            "image.png",
        ])
        .map_err(|e| invalid_parameter("arguments", &"", &e))?;
        let config = cli.options.to_config()?;
        assert_eq!(config.predictor, PredictorKind::Med);
        assert_eq!(config.backend, BackendKind::Golomb);
        assert!(!config.adaptive_transposition);
        assert!((config.neighborhood.right - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.training_size, CoderConfig::default().training_size);
        Ok(())
    }

    #[test]
    fn test_verbosity_selects_log_level() -> Result<()> {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(args).map_err(|e| invalid_parameter("arguments", &"", &e))
        };
        assert_eq!(parse(&["pixelfit", "decode", "a", "b"])?.log_level(), "warn");
        assert_eq!(parse(&["pixelfit", "-v", "decode", "a", "b"])?.log_level(), "info");
        assert_eq!(parse(&["pixelfit", "-q", "-vv", "decode", "a", "b"])?.log_level(), "error");
        Ok(())
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let args = ["pixelfit", "--predictor", "paeth", "decode", "a", "b"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
