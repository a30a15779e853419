//! Coding constants and runtime configuration defaults

use crate::io::error::{Result, invalid_parameter};
use log::warn;
use std::fmt;
use std::str::FromStr;

// Entropy coder working range
/// Exclusive upper bound of the arithmetic coder interval
pub const RANGE_MAX: u32 = 1 << 31;
/// Midpoint of the arithmetic coder interval
pub const RANGE_HALF: u32 = 1 << 30;
/// First quarter point of the arithmetic coder interval
pub const RANGE_QUARTER: u32 = 1 << 29;
/// Third quarter point of the arithmetic coder interval
pub const RANGE_THREE_QUARTERS: u32 = 3 << 29;

// Rice-Golomb parameter mapping, derived for Laplacian residuals
/// `sqrt(2) * ln(2)`, maps the residual spread to the Golomb parameter
pub const GOLOMB_MAGIC_FACTOR: f64 = 0.980_258_143_468_547_2;
/// Offset applied to the stretched standard deviation
pub const GOLOMB_STRETCH: f64 = 0.510_461_012_089_457_7;
/// Square of [`GOLOMB_STRETCH`]
pub const GOLOMB_STRETCH_SQUARED: f64 = 0.260_570_444_863_393_5;
/// Variance below which a zero residual is likely enough for run mode
pub const GOLOMB_RUN_VARIANCE: f64 = 1.040_684_490_502_803_9;
/// Variance floor inside run mode
pub const GOLOMB_MIN_VARIANCE: f64 = 0.1;
/// Runs are flushed once they reach this multiple of the run parameter
pub const GOLOMB_RUN_CAP_FACTOR: u32 = 10;

/// Variance floor used by every parametric distribution
pub const MIN_DISTRIBUTION_VARIANCE: f64 = 1e-14;
/// Sparsified mass, relative to the law weight, below which probable
/// values share the weight uniformly
pub const MIN_SPARSE_MASS: f64 = 1e-14;
/// Largest sample value for which sparsification runs; the per-sample
/// score smoothing grows with the square of the sample range
pub const MAX_SPARSE_MAXVAL: u32 = 1023;
/// Smallest weight an exponential weighting may produce
pub const MIN_EXPONENTIAL_WEIGHT: f64 = 1e-300;

/// Exponential variance smoothing: weight of the previous estimate
pub const EXPONENTIAL_VARIANCE_MEMORY: f64 = 0.8;
/// Scale applied to inverse-distance priorizations
pub const PRIORIZATION_SCALE: f64 = 60.0;
/// Scale of the top-k weighting's distance penalty
pub const CROPPED_WEIGHT_PENALTY: f64 = 0.000_02;
/// Coefficient uncertainty used when the leverage term turns negative
pub const NEGATIVE_LEVERAGE_FALLBACK: f64 = 10.0;

/// Largest image dimension accepted without a warning
pub const MAX_IMAGE_SIZE_WARNING: u32 = 40_000;
/// Number of image types coded in the header
pub const IMAGE_TYPE_COUNT: u32 = 3;
/// Largest bit depth the header can carry
pub const MAX_HEADER_BIT_DEPTH: u32 = 16;

// Default values for configurable parameters
/// Default neighborhood radii (top, left, right, bottom, front)
pub const DEFAULT_NEIGHBORHOOD: [f64; 5] = [2.5, 3.0, 3.5, 0.0, 0.0];
/// Neighborhood radii the MED predictor is defined on
pub const MED_NEIGHBORHOOD: [f64; 5] = [1.5, 1.5, 0.5, 0.0, 0.0];
/// Default training region half-extent in the image plane
pub const DEFAULT_TRAINING_SIZE: usize = 16;
/// Default radius of the residual variance window
pub const DEFAULT_VARIANCE_RADIUS: f64 = 4.5;
/// Default maximum image dimension
pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 8192;
/// Default ridge added at border pixels
pub const DEFAULT_BORDER_REGULARIZATION: f64 = 1.0;
/// Default ridge added at interior pixels
pub const DEFAULT_INNER_REGULARIZATION: f64 = 0.1;
/// Default sparsification strength
pub const DEFAULT_SPARSIFY: f64 = 0.5;
/// Default radius of the sparsification context window
pub const DEFAULT_SPARSIFICATION_SIZE: f64 = 60.0;
/// Default cap on the bits a single sample may cost
pub const DEFAULT_MAX_BITS_PER_PIXEL: u32 = 30;
/// Default ratio between primary and regularization density
pub const DEFAULT_REGULARIZATION_RATIO: f64 = 10_000.0;
/// Default decay of the NLM weighting
pub const DEFAULT_NLM_DECAY: f64 = 0.146;

// Progress bar display settings
/// Width of progress bars in characters
pub const PROGRESS_BAR_WIDTH: u16 = 40;

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $parameter:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Canonical upper-case name
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = crate::io::error::CodecError;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(invalid_parameter(
                        $parameter,
                        &s,
                        &concat!("expected one of: ", $($text, " "),+),
                    )),
                }
            }
        }
    };
}

named_enum! {
    /// Pixel value predictor
    PredictorKind, "predictor" {
        /// Mean of the causal neighborhood
        Mean => "MEAN",
        /// LOCO-I median edge detector
        Med => "MED",
        /// Non-local means over the training region
        Nlm => "NLM",
        /// Ordinary least squares
        Ls => "LS",
        /// Weighted least squares
        Wls => "WLS",
        /// Least squares with prefix-sum covariance
        FastLs => "FASTLS",
    }
}

named_enum! {
    /// Prediction variance estimator
    VarianceKind, "variance" {
        /// Exponential moving average of squared residuals
        Exponential => "EXPONENTIAL",
        /// Window mean of squared residuals
        Residual => "RESIDUAL",
        /// Analytic least-squares residual variance
        Ls => "LS",
    }
}

named_enum! {
    /// Continuous law used to discretize predictions
    DistributionKind, "distribution" {
        /// Gaussian
        Normal => "NORMAL",
        /// Laplacian
        Laplace => "LAPLACE",
        /// Student's t
        StudentT => "T",
        /// Uniform ramp
        Uniform => "UNIFORM",
    }
}

named_enum! {
    /// Entropy coding back end
    BackendKind, "backend" {
        /// Carryless binary range coder
        Arithmetic => "ARITHMETIC",
        /// Rice-Golomb coder with run mode
        Golomb => "GOLOMB",
    }
}

named_enum! {
    /// Linear system solver for the regression
    Solver, "solver" {
        /// Cholesky decomposition, QR on failure
        Cholesky => "CHOLESKY",
        /// Householder QR
        Qr => "QR",
    }
}

named_enum! {
    /// Use of previously coded channels in color images
    InterChannel, "inter_channel_prediction" {
        /// Channels are predicted independently
        Off => "OFF",
        /// Co-located pixels of past channels join the neighborhood
        CoLocated => "COLOCATED",
        /// Co-located pixels and their causal cross of past channels join
        Forward => "FORWARD",
    }
}

named_enum! {
    /// Weight policy of the weighted least-squares variance
    WlsVarianceEquation, "wls_variance_equation" {
        /// Residual sum of squares from the normal equations
        Plain => "PLAIN",
        /// Explicit residuals with squared weights
        SquaredWeights => "SQUARED",
    }
}

named_enum! {
    /// Distance used by the NLM weighting
    NlmDistance, "nlm_distance" {
        /// Sum of absolute differences
        Sad => "SAD",
        /// Sum of squared differences
        Ssd => "SSD",
    }
}

named_enum! {
    /// Similarity measure of the weighted least-squares training weights
    WlsWeighting, "wls_weighting" {
        /// Inverse priorized distance to the reference neighborhood
        Distance => "DISTANCE",
        /// Absolute cosine similarity with the reference neighborhood
        Correlation => "CORRELATION",
    }
}

/// Ellipse or ellipsoid radii per side of the anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radii {
    /// Rows above the anchor
    pub top: f64,
    /// Columns left of the anchor
    pub left: f64,
    /// Columns right of the anchor
    pub right: f64,
    /// Rows below the anchor in past slices
    pub bottom: f64,
    /// Past slices
    pub front: f64,
}

impl Radii {
    /// Radii from a `[top, left, right, bottom, front]` array
    pub const fn from_array(radii: [f64; 5]) -> Self {
        Self {
            top: radii[0],
            left: radii[1],
            right: radii[2],
            bottom: radii[3],
            front: radii[4],
        }
    }

    /// Same radius on every side, without a past-slice extent
    pub const fn circle(radius: f64) -> Self {
        Self {
            top: radius,
            left: radius,
            right: radius,
            bottom: 0.0,
            front: 0.0,
        }
    }

    /// Whether the shape reaches into past slices
    pub fn is_volumetric(&self) -> bool {
        self.front > 0.0
    }

    fn as_array(self) -> [f64; 5] {
        [self.top, self.left, self.right, self.bottom, self.front]
    }

    fn smaller_than(self, other: Self) -> bool {
        self.as_array()
            .iter()
            .zip(other.as_array())
            .any(|(mine, theirs)| *mine < theirs)
    }
}

impl Default for Radii {
    fn default() -> Self {
        Self::from_array(DEFAULT_NEIGHBORHOOD)
    }
}

/// How border protrusion is shared between neighborhood and training region
///
/// Each entry is a power-of-two divisor: the neighborhood may keep
/// `position >> ratio` samples on that side before the training region is cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderSplit {
    /// Split above the anchor
    pub top: u32,
    /// Split left of the anchor
    pub left: u32,
    /// Split right of the anchor
    pub right: u32,
    /// Split below the anchor
    pub bottom: u32,
    /// Split along past slices
    pub front: u32,
}

impl Default for BorderSplit {
    fn default() -> Self {
        Self {
            top: 1,
            left: 1,
            right: 1,
            bottom: 1,
            front: 0,
        }
    }
}

/// Complete parameter set shared by encoder and decoder
///
/// Both sides of a session must use identical values; nothing here is
/// transmitted in the bitstream.
#[derive(Debug, Clone, PartialEq)]
pub struct CoderConfig {
    /// Pixel value predictor
    pub predictor: PredictorKind,
    /// Variance estimator
    pub variance: VarianceKind,
    /// Primary distribution law
    pub distribution: DistributionKind,
    /// Regularization distribution law
    pub regularization: DistributionKind,
    /// Entropy back end
    pub backend: BackendKind,
    /// Prediction neighborhood radii
    pub neighborhood: Radii,
    /// Training region half-extent in the image plane
    pub training_size: usize,
    /// Training region extent into past slices
    pub training_size_3d: usize,
    /// Residual variance window radius
    pub variance_radius: f64,
    /// Code the transposed image when it looks smoother
    pub adaptive_transposition: bool,
    /// Largest width or height
    pub max_image_size: u32,
    /// Use of past channels for color images
    pub inter_channel: InterChannel,
    /// Weight policy of the WLS variance
    pub wls_variance_equation: WlsVarianceEquation,
    /// Similarity measure of the WLS training weights
    pub wls_weighting: WlsWeighting,
    /// Radius of the separate matching neighborhood, 0 disables it
    pub matching_neighborhood: f64,
    /// Keep only this many highest-weight training vectors, 0 keeps all
    pub max_training_vectors: usize,
    /// Regression solver
    pub solver: Solver,
    /// Ridge added at border pixels, 0 disables all regularization
    pub border_regularization: f64,
    /// Ridge added at interior pixels
    pub inner_regularization: f64,
    /// Memoize neighborhood vectors per position
    pub neighborhood_buffer: bool,
    /// Sparsification strength, 0 disables it
    pub sparsify: f64,
    /// Sparsification context radius
    pub sparsification_size: f64,
    /// Cap on the code length of one sample
    pub max_bits_per_pixel: u32,
    /// Ratio between the densities of primary and regularization laws
    pub regularization_ratio: f64,
    /// Border protrusion split
    pub border_split: BorderSplit,
    /// NLM weighting decay
    pub nlm_decay: f64,
    /// NLM distance measure
    pub nlm_distance: NlmDistance,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            predictor: PredictorKind::Wls,
            variance: VarianceKind::Ls,
            distribution: DistributionKind::StudentT,
            regularization: DistributionKind::Laplace,
            backend: BackendKind::Arithmetic,
            neighborhood: Radii::default(),
            training_size: DEFAULT_TRAINING_SIZE,
            training_size_3d: 0,
            variance_radius: DEFAULT_VARIANCE_RADIUS,
            adaptive_transposition: true,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            inter_channel: InterChannel::Forward,
            wls_variance_equation: WlsVarianceEquation::SquaredWeights,
            wls_weighting: WlsWeighting::Distance,
            matching_neighborhood: 0.0,
            max_training_vectors: 0,
            solver: Solver::Cholesky,
            border_regularization: DEFAULT_BORDER_REGULARIZATION,
            inner_regularization: DEFAULT_INNER_REGULARIZATION,
            neighborhood_buffer: true,
            sparsify: DEFAULT_SPARSIFY,
            sparsification_size: DEFAULT_SPARSIFICATION_SIZE,
            max_bits_per_pixel: DEFAULT_MAX_BITS_PER_PIXEL,
            regularization_ratio: DEFAULT_REGULARIZATION_RATIO,
            border_split: BorderSplit::default(),
            nlm_decay: DEFAULT_NLM_DECAY,
            nlm_distance: NlmDistance::Sad,
        }
    }
}

impl CoderConfig {
    /// Check parameter consistency, applying the logged auto-corrections
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The MED predictor is combined with a neighborhood other than its own
    /// - `max_bits_per_pixel` lies outside `1..=30`
    /// - The regularization ratio or a size parameter is not positive
    pub fn validate(&mut self) -> Result<()> {
        let standard_med = Radii::from_array(MED_NEIGHBORHOOD);
        if self.predictor == PredictorKind::Med && self.neighborhood != standard_med {
            return Err(invalid_parameter(
                "neighborhood",
                &format!("{:?}", self.neighborhood.as_array()),
                &"MED requires top 1.5, left 1.5, right 0.5, bottom 0, front 0",
            ));
        }
        if self.predictor == PredictorKind::Nlm && self.neighborhood != Radii::default() {
            warn!("NLM with a non-default neighborhood is untested");
        }
        if self.predictor != PredictorKind::Wls && self.wls_weighting != WlsWeighting::Distance {
            warn!("{} weighting only applies to WLS; ignored", self.wls_weighting);
        }
        if self.max_image_size == 0 {
            return Err(invalid_parameter(
                "max_image_size",
                &self.max_image_size,
                &"must be positive",
            ));
        }
        if self.max_image_size > MAX_IMAGE_SIZE_WARNING {
            warn!(
                "max_image_size {} exceeds {MAX_IMAGE_SIZE_WARNING}; header distributions degrade",
                self.max_image_size
            );
        }
        if !(1..=30).contains(&self.max_bits_per_pixel) {
            return Err(invalid_parameter(
                "max_bits_per_pixel",
                &self.max_bits_per_pixel,
                &"must lie in 1..=30 to fit the coder range",
            ));
        }
        if self.regularization_ratio <= 1.0 || !self.regularization_ratio.is_finite() {
            return Err(invalid_parameter(
                "max_to_min_regularization_ratio",
                &self.regularization_ratio,
                &"must be a finite value above 1",
            ));
        }
        if self.variance_radius < 1.0 && self.variance == VarianceKind::Residual {
            return Err(invalid_parameter(
                "variance_radius",
                &self.variance_radius,
                &"the residual window needs a radius of at least 1",
            ));
        }
        if self.inter_channel != InterChannel::Off
            && self.neighborhood.is_volumetric()
            && self.training_size_3d > 0
        {
            warn!("inter-channel prediction does not combine with volumetric contexts; disabling it");
            self.inter_channel = InterChannel::Off;
        }
        if self.matching_neighborhood > 0.0 {
            let matching = if self.neighborhood.is_volumetric() {
                Radii {
                    bottom: self.matching_neighborhood,
                    front: self.matching_neighborhood,
                    ..Radii::circle(self.matching_neighborhood)
                }
            } else {
                Radii::circle(self.matching_neighborhood)
            };
            if matching.smaller_than(self.neighborhood) {
                warn!(
                    "matching neighborhood {} is smaller than the prediction neighborhood; disabling it",
                    self.matching_neighborhood
                );
                self.matching_neighborhood = 0.0;
            }
        }
        if self.backend == BackendKind::Golomb && self.sparsify > 0.0 {
            warn!("sparsification has no effect with the Golomb back end");
        }
        Ok(())
    }

    /// Whether the configured predictor fits a regression model
    pub const fn is_regression(&self) -> bool {
        matches!(
            self.predictor,
            PredictorKind::Ls | PredictorKind::Wls | PredictorKind::FastLs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_case_insensitively() -> Result<()> {
        assert_eq!("wls".parse::<PredictorKind>()?, PredictorKind::Wls);
        assert_eq!("FastLS".parse::<PredictorKind>()?, PredictorKind::FastLs);
        assert_eq!("t".parse::<DistributionKind>()?, DistributionKind::StudentT);
        assert!("PAETH".parse::<PredictorKind>().is_err());
        Ok(())
    }

    #[test]
    fn test_med_requires_its_neighborhood() {
        let mut config = CoderConfig {
            predictor: PredictorKind::Med,
            ..CoderConfig::default()
        };
        assert!(config.validate().is_err());

        config.neighborhood = Radii::from_array(MED_NEIGHBORHOOD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_small_matching_neighborhood_is_disabled() -> Result<()> {
        let mut config = CoderConfig {
            matching_neighborhood: 1.0,
            ..CoderConfig::default()
        };
        config.validate()?;
        assert!(config.matching_neighborhood.abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn test_range_constants_are_consistent() {
        assert_eq!(RANGE_HALF * 2, RANGE_MAX);
        assert_eq!(RANGE_QUARTER * 2, RANGE_HALF);
        assert_eq!(RANGE_THREE_QUARTERS, RANGE_HALF + RANGE_QUARTER);
    }
}
