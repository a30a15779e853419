//! Pixel-by-pixel coding sessions
//!
//! Encoding, decoding and prediction share one raster pass: for every
//! position the predictor yields a prediction, a variance and degrees of
//! freedom from the samples coded before it, the pixel model turns them into
//! a symbol model, and the back end codes the sample. Decoding writes each
//! decoded sample into the working planes before moving on, so both sides
//! see identical causal data.

use crate::codec::header::{Header, HeaderCoder};
use crate::codec::samples::{self, ImageKind, RawImage};
use crate::distribution::{Component, CumulativeLaw, DistributionMaker, Law, LawParameters, SparseLaw};
use crate::entropy::{Backend, EntropyCoder, SymbolModel};
use crate::io::configuration::{BackendKind, CoderConfig, DistributionKind, InterChannel, MAX_SPARSE_MAXVAL};
use crate::io::error::{Result, WithContext, unsupported_image};
use crate::io::progress::CodingProgress;
use crate::prediction::Predictor;
use crate::spatial::{Position, StructuringElement};
use log::{debug, info, warn};
use ndarray::{Array3, s};
use statrs::function::erf::erf;
use std::f64::consts::PI;

/// Per-sample model outputs of a prediction-only pass
///
/// Maps use the coding layout of the image (see [`samples::to_planes`]) in
/// its original orientation; the leading ones plane of color images stays 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMaps {
    /// Predicted sample values
    pub prediction: Array3<f64>,
    /// Predicted residual variances
    pub variance: Array3<f64>,
    /// Degrees of freedom of the regressions, 1 for direct predictors
    pub degrees_of_freedom: Array3<f64>,
    /// Ideal code length of each sample under its model, in bits
    pub bits: Array3<f64>,
}

impl PredictionMaps {
    fn zeros(shape: [usize; 3]) -> Self {
        Self {
            prediction: Array3::zeros(shape),
            variance: Array3::zeros(shape),
            degrees_of_freedom: Array3::zeros(shape),
            bits: Array3::zeros(shape),
        }
    }

    fn transposed(&self) -> Self {
        Self {
            prediction: samples::transpose(&self.prediction),
            variance: samples::transpose(&self.variance),
            degrees_of_freedom: samples::transpose(&self.degrees_of_freedom),
            bits: samples::transpose(&self.bits),
        }
    }
}

/// Variance and weight of the regularization law
///
/// The weight is chosen so that the least probable sample still gets an
/// interval of at least one unit at `max_bits_per_pixel` bits of resolution.
pub fn regularization(config: &CoderConfig, maxval: u32) -> (f64, f64) {
    let maxval = f64::from(maxval);
    let ratio = config.regularization_ratio;
    let log_ratio = ratio.ln();
    let resolution = f64::from(1_u32 << config.max_bits_per_pixel);
    match config.regularization {
        DistributionKind::Uniform => {
            let weight = (maxval + 1.0) / f64::from(1_u32 << (config.max_bits_per_pixel - 1));
            (1.0, weight)
        }
        DistributionKind::Laplace => {
            let variance = 2.0 * (maxval / log_ratio).powi(2);
            let scale = (2.0 * variance).sqrt();
            let weight = ratio * scale / resolution * (1.0 - (-(maxval + 1.0) / scale).exp());
            (variance, weight)
        }
        DistributionKind::Normal | DistributionKind::StudentT => {
            let variance = maxval * maxval / (2.0 * log_ratio);
            let weight = ratio * (2.0 * PI * variance).sqrt() / resolution
                * erf((maxval + 1.0) / (8.0 * variance).sqrt());
            (variance, weight)
        }
    }
}

// Symbol model of the samples, rebuilt around every prediction
struct PixelModel {
    maker: Option<DistributionMaker>,
    maxval: u32,
    weight: f64,
    regularization_variance: f64,
}

impl PixelModel {
    fn new(config: &CoderConfig, kind: ImageKind, maxval: u32, sample_count: usize) -> Self {
        let (regularization_variance, weight) = regularization(config, maxval);
        let sparsify = config.sparsify > 0.0 && config.backend == BackendKind::Arithmetic;
        if sparsify && maxval > MAX_SPARSE_MAXVAL {
            warn!("sparsification disabled for samples above {MAX_SPARSE_MAXVAL} (maximum {maxval})");
        }
        let sparsify = sparsify && maxval <= MAX_SPARSE_MAXVAL;
        let maker = (config.backend == BackendKind::Arithmetic).then(|| {
            let main = Law::new(config.distribution);
            let main = if sparsify {
                Component::Sparse(Box::new(SparseLaw::new(
                    main,
                    maxval,
                    kind == ImageKind::Color,
                    StructuringElement::half_circle(config.sparsification_size, false),
                    config.sparsify,
                    sample_count,
                )))
            } else {
                Component::Law(main)
            };
            let floor = match config.regularization {
                DistributionKind::StudentT => Law::new(DistributionKind::Normal),
                other => Law::new(other),
            };
            DistributionMaker::new(maxval + 2)
                .with(main)
                .with(Component::Law(floor))
        });
        debug!("regularization weight {weight:.3e}, variance {regularization_variance:.3}");
        Self {
            maker,
            maxval,
            weight,
            regularization_variance,
        }
    }

    fn update(
        &mut self,
        planes: &Array3<f64>,
        position: Position,
        prediction: f64,
        variance: f64,
        dof: f64,
    ) -> SymbolModel<'_> {
        let Some(maker) = self.maker.as_mut() else {
            return SymbolModel::Laplacian {
                mean: prediction,
                variance,
                symbols: self.maxval + 1,
            };
        };
        let main = LawParameters::new(1.0 - self.weight, prediction, variance, dof);
        match maker.component_mut(0) {
            Some(Component::Sparse(law)) => law.update(&main, None, planes, position),
            Some(Component::Law(law)) => law.set_parameters(&main, None),
            None => {}
        }
        if let Some(Component::Law(law)) = maker.component_mut(1) {
            law.set_parameters(
                &LawParameters::new(self.weight, prediction, self.regularization_variance, 1.0),
                Some(self.maxval),
            );
        }
        SymbolModel::Distribution(maker)
    }
}

enum Pass<'a> {
    Encode(&'a mut Backend),
    Decode(&'a mut Backend),
    Predict(&'a mut PredictionMaps),
}

impl Pass<'_> {
    const fn label(&self) -> &'static str {
        match self {
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::Predict(_) => "predict",
        }
    }
}

/// Lossless coder for one configuration
///
/// Encoder and decoder must be built from identical configurations; nothing
/// but the header is transmitted.
#[derive(Debug, Clone)]
pub struct Coder {
    config: CoderConfig,
    progress: CodingProgress,
}

impl Coder {
    /// Coder for `config`, after validation and its logged auto-corrections
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::InvalidParameter`] for inconsistent
    /// configurations
    pub fn new(mut config: CoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: CodingProgress::hidden(),
        })
    }

    /// Report progress per coded row
    #[must_use]
    pub fn with_progress(mut self, progress: CodingProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Effective configuration
    pub const fn config(&self) -> &CoderConfig {
        &self.config
    }

    fn full_neighborhood(&self) -> StructuringElement {
        let radii = self.config.neighborhood;
        if radii.front > 0.0 {
            StructuringElement::half_ellipsoid(
                radii.top,
                radii.left,
                radii.right,
                radii.bottom,
                radii.front,
                true,
            )
        } else {
            StructuringElement::half_ellipse(radii.top, radii.left, radii.right, true)
        }
    }

    // Neighborhood reaching into the `channels` planes coded before the current one
    fn channel_neighborhood(&self, channels: usize) -> StructuringElement {
        let radii = self.config.neighborhood;
        match self.config.inter_channel {
            InterChannel::CoLocated => StructuringElement::half_ellipse_multichannel(
                radii.top, radii.left, radii.right, channels, true,
            ),
            InterChannel::Forward | InterChannel::Off => {
                StructuringElement::half_ellipse_multichannel_forward(
                    radii.top, radii.left, radii.right, channels, true,
                )
            }
        }
    }

    // Header and coding planes of an image, transposed when that looks smoother
    fn prepare(&self, image: &RawImage) -> Result<(Header, Array3<f64>)> {
        let mut planes = samples::to_planes(image);
        let transposed = self.config.adaptive_transposition && samples::prefers_transposition(&planes);
        if transposed {
            planes = samples::transpose(&planes);
        }
        let extent = |value: usize, what: &str| {
            u32::try_from(value).map_err(|e| unsupported_image(&format!("{what} {value}: {e}")))
        };
        let header = Header {
            kind: image.kind(),
            transposed,
            bit_depth: image.bit_depth(),
            width: extent(planes.dim().2, "width")?,
            height: extent(planes.dim().1, "height")?,
            depth: extent(image.planes(), "depth")?,
        };
        info!(
            "{} image {}x{}x{}, {} bits{}",
            header.kind,
            image.width(),
            image.height(),
            header.depth,
            header.bit_depth,
            if transposed { ", coded transposed" } else { "" }
        );
        Ok((header, planes))
    }

    fn run(&self, header: &Header, planes: &mut Array3<f64>, pass: &mut Pass<'_>) -> Result<()> {
        let maxval = header.maxval();
        let shape = header.shape();
        let buffered = self.config.neighborhood_buffer;
        let mut predictor = Predictor::new(&self.config, self.full_neighborhood());
        predictor.set_image(shape, maxval, buffered)?;
        let mut model = PixelModel::new(&self.config, header.kind, maxval, planes.len());
        let costs = Backend::encoder(self.config.backend);

        let first = usize::from(header.kind == ImageKind::Color);
        let [slices, rows, cols] = shape;
        self.progress.start(pass.label(), ((slices - first) * rows) as u64);
        for slice in first..slices {
            if header.kind == ImageKind::Color
                && self.config.inter_channel != InterChannel::Off
                && slice > 1
            {
                predictor = Predictor::new(&self.config, self.channel_neighborhood(slice));
                predictor.set_image(shape, maxval, buffered)?;
            }
            self.progress.set_plane(slice - first, slices - first);
            for row in 0..rows {
                for col in 0..cols {
                    let position = [slice, row, col];
                    let prediction = predictor.compute_prediction(planes, position).at_position(position)?;
                    let variance = predictor.compute_variance(planes).at_position(position)?;
                    let dof = predictor.compute_degrees_of_freedom()?;
                    match pass {
                        Pass::Encode(backend) => {
                            let symbol = planes[position] as u32;
                            let symbols = model.update(planes, position, prediction, variance, dof);
                            backend.encode(symbol, symbols).at_position(position)?;
                        }
                        Pass::Decode(backend) => {
                            let symbols = model.update(planes, position, prediction, variance, dof);
                            let symbol = backend.decode(symbols).at_position(position)?;
                            planes[position] = f64::from(symbol);
                        }
                        Pass::Predict(maps) => {
                            maps.prediction[position] = prediction;
                            maps.variance[position] = variance;
                            maps.degrees_of_freedom[position] = dof;
                            let symbol = planes[position] as u32;
                            let symbols = model.update(planes, position, prediction, variance, dof);
                            maps.bits[position] = costs.costs(symbol, symbols)?;
                        }
                    }
                }
                self.progress.advance();
            }
        }
        self.progress.finish();
        Ok(())
    }

    /// Compress `image` into a self-describing bitstream
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::UnsupportedImage`] if the image exceeds
    /// the configured maximum size, [`crate::CodecError::ZeroProbability`] if
    /// the regularization cannot cover a sample, or propagates model failures
    pub fn encode(&self, image: &RawImage) -> Result<Vec<u8>> {
        let bytes = self.encode_backend(image)?.to_bytes();
        info!(
            "coded {} samples into {} bytes ({:.3} bits per sample)",
            image.len(),
            bytes.len(),
            bytes.len() as f64 * 8.0 / image.len() as f64
        );
        Ok(bytes)
    }

    /// Length in bits of the bitstream of `image`, before byte padding
    ///
    /// # Errors
    ///
    /// Fails under the conditions of [`Self::encode`]
    pub fn encoded_bits(&self, image: &RawImage) -> Result<usize> {
        Ok(self.encode_backend(image)?.queue().len())
    }

    fn encode_backend(&self, image: &RawImage) -> Result<Backend> {
        let (header, mut planes) = self.prepare(image)?;
        let mut backend = Backend::encoder(self.config.backend);
        HeaderCoder::new(&self.config).encode(&header, &mut backend)?;
        self.run(&header, &mut planes, &mut Pass::Encode(&mut backend))?;
        backend.finalize();
        Ok(backend)
    }

    /// Restore an image from a bitstream produced by [`Self::encode`]
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::BitstreamUnderrun`] for truncated streams,
    /// or a computation error when the stream does not match the configuration
    pub fn decode(&self, bytes: &[u8]) -> Result<RawImage> {
        let mut backend = Backend::decoder(self.config.backend, bytes);
        let header = HeaderCoder::new(&self.config).decode(&mut backend)?;
        let mut planes = Array3::from_elem(header.shape(), f64::NAN);
        if header.kind == ImageKind::Color {
            planes.slice_mut(s![0, .., ..]).fill(1.0);
        }
        info!(
            "decoding {} image {}x{}x{}, {} bits",
            header.kind, header.width, header.height, header.depth, header.bit_depth
        );
        self.run(&header, &mut planes, &mut Pass::Decode(&mut backend))?;

        let planes = if header.transposed {
            samples::transpose(&planes)
        } else {
            planes
        };
        samples::from_planes(header.kind, &planes, header.bit_depth)
    }

    /// Model outputs for every sample without coding
    ///
    /// # Errors
    ///
    /// Propagates model failures
    pub fn predict(&self, image: &RawImage) -> Result<PredictionMaps> {
        let (header, mut planes) = self.prepare(image)?;
        let mut maps = PredictionMaps::zeros(header.shape());
        self.run(&header, &mut planes, &mut Pass::Predict(&mut maps))?;
        Ok(if header.transposed {
            maps.transposed()
        } else {
            maps
        })
    }
}
