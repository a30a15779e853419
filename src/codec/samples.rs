//! Sample containers and their conversion to the coding layout
//!
//! Every image is coded as a 3-D array `[slice, row, col]` of `f64`. Color
//! images get an extra leading slice of ones so that regressions over past
//! channels can fit an affine offset, and their channels are reordered so
//! the green channel, usually the most detailed one, is coded first.

use crate::io::configuration::IMAGE_TYPE_COUNT;
use crate::io::error::{Result, computation_error, unsupported_image};
use ndarray::{Array3, ArrayView3, s};
use num_traits::{PrimInt, ToPrimitive, Unsigned};
use std::fmt;

/// Image topology, coded as the first header symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Single plane of samples
    Gray,
    /// Several planes of one picture
    Color,
    /// Stack of slices of a volume
    Volume,
}

impl ImageKind {
    /// Header symbol of this kind
    pub const fn code(self) -> u32 {
        match self {
            Self::Gray => 0,
            Self::Color => 1,
            Self::Volume => 2,
        }
    }

    /// Kind coded as `code`
    ///
    /// # Errors
    ///
    /// Returns a computation error for codes outside the known kinds
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::Gray),
            1 => Ok(Self::Color),
            2 => Ok(Self::Volume),
            _ => Err(computation_error(
                "header decoding",
                &format!("image type {code} is not below {IMAGE_TYPE_COUNT}"),
            )),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gray => "gray",
            Self::Color => "color",
            Self::Volume => "volume",
        })
    }
}

/// Width of the integer type samples are stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    /// `u8` samples
    Eight,
    /// `u16` samples
    Sixteen,
}

impl SampleDepth {
    /// Narrowest container for samples of `bits` bits
    pub const fn for_bits(bits: u32) -> Self {
        if bits <= 8 { Self::Eight } else { Self::Sixteen }
    }
}

/// Unsigned integer samples of a gray, color or volume image
///
/// Samples are laid out `[plane, row, col]`: one plane for gray images,
/// one per channel in storage order (R, G, B, A) for color images, one per
/// slice for volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    kind: ImageKind,
    samples: Array3<u16>,
    container: SampleDepth,
}

impl RawImage {
    /// Wrap samples of the given kind
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::UnsupportedImage`] if the image is empty,
    /// a gray image has more than one plane, or 8-bit samples exceed 255
    pub fn new(kind: ImageKind, samples: Array3<u16>, container: SampleDepth) -> Result<Self> {
        if samples.is_empty() {
            return Err(unsupported_image(&"image has no samples"));
        }
        let (planes, _, _) = samples.dim();
        if kind == ImageKind::Gray && planes != 1 {
            return Err(unsupported_image(&format!("gray image with {planes} planes")));
        }
        if container == SampleDepth::Eight && samples.iter().any(|v| *v > u16::from(u8::MAX)) {
            return Err(unsupported_image(&"8-bit image holds samples above 255"));
        }
        Ok(Self {
            kind,
            samples,
            container,
        })
    }

    /// Wrap samples of any unsigned 8- or 16-bit integer type
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::UnsupportedImage`] for wider sample types
    /// or under the conditions of [`Self::new`]
    pub fn from_samples<T>(kind: ImageKind, samples: ArrayView3<'_, T>) -> Result<Self>
    where
        T: PrimInt + Unsigned + ToPrimitive,
    {
        let container = match T::zero().count_zeros() {
            8 => SampleDepth::Eight,
            16 => SampleDepth::Sixteen,
            bits => {
                return Err(unsupported_image(&format!(
                    "{bits}-bit samples; only 8 and 16 bits are coded"
                )));
            }
        };
        let samples = samples.mapv(|v| v.to_u16().unwrap_or(u16::MAX));
        Self::new(kind, samples, container)
    }

    /// Topology
    pub const fn kind(&self) -> ImageKind {
        self.kind
    }

    /// Samples `[plane, row, col]`
    pub const fn samples(&self) -> &Array3<u16> {
        &self.samples
    }

    /// Storage width
    pub const fn container(&self) -> SampleDepth {
        self.container
    }

    /// Number of planes
    pub fn planes(&self) -> usize {
        self.samples.dim().0
    }

    /// Rows per plane
    pub fn height(&self) -> usize {
        self.samples.dim().1
    }

    /// Columns per plane
    pub fn width(&self) -> usize {
        self.samples.dim().2
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the image holds no sample
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Bits needed for the largest sample
    ///
    /// At least 1, and at least 9 for 16-bit containers so that the decoder
    /// restores the container width.
    pub fn bit_depth(&self) -> u32 {
        let max = self.samples.iter().copied().max().unwrap_or(0);
        let bits = u16::BITS - max.leading_zeros();
        let bits = bits.max(1);
        if self.container == SampleDepth::Sixteen {
            bits.max(9)
        } else {
            bits
        }
    }
}

/// Coding order of the channels of a color image with `channels` planes
///
/// Green leads for RGB and RGBA; other channel counts keep storage order.
pub fn coding_order(channels: usize) -> Vec<usize> {
    match channels {
        3 | 4 => [1, 0, 2, 3].into_iter().take(channels).collect(),
        _ => (0..channels).collect(),
    }
}

/// Samples in the coding layout
pub fn to_planes(image: &RawImage) -> Array3<f64> {
    let samples = image.samples();
    match image.kind() {
        ImageKind::Gray | ImageKind::Volume => samples.mapv(f64::from),
        ImageKind::Color => {
            let [channels, rows, cols] = [image.planes(), image.height(), image.width()];
            let mut planes = Array3::from_elem((channels + 1, rows, cols), 1.0);
            for (slot, channel) in coding_order(channels).into_iter().enumerate() {
                planes
                    .slice_mut(s![slot + 1, .., ..])
                    .assign(&samples.slice(s![channel, .., ..]).mapv(f64::from));
            }
            planes
        }
    }
}

/// Image rebuilt from the coding layout
///
/// # Errors
///
/// Returns a computation error if a sample is not an integer in `0..2^bits`
pub fn from_planes(kind: ImageKind, planes: &Array3<f64>, bits: u32) -> Result<RawImage> {
    let maxval = f64::from((1_u32 << bits) - 1);
    let to_sample = |value: f64| -> Result<u16> {
        if value.is_finite() && (0.0..=maxval).contains(&value) && value.fract() == 0.0 {
            Ok(value as u16)
        } else {
            Err(computation_error(
                "sample restoration",
                &format!("{value} is not a {bits}-bit sample"),
            ))
        }
    };

    let (slices, rows, cols) = planes.dim();
    let mut samples = match kind {
        ImageKind::Gray | ImageKind::Volume => Array3::zeros((slices, rows, cols)),
        ImageKind::Color => Array3::zeros((slices.saturating_sub(1), rows, cols)),
    };
    match kind {
        ImageKind::Gray | ImageKind::Volume => {
            for (sample, value) in samples.iter_mut().zip(planes.iter()) {
                *sample = to_sample(*value)?;
            }
        }
        ImageKind::Color => {
            let (channels, _, _) = samples.dim();
            for (slot, channel) in coding_order(channels).into_iter().enumerate() {
                let source = planes.slice(s![slot + 1, .., ..]);
                let mut target = samples.slice_mut(s![channel, .., ..]);
                for (sample, value) in target.iter_mut().zip(source.iter()) {
                    *sample = to_sample(*value)?;
                }
            }
        }
    }
    RawImage::new(kind, samples, SampleDepth::for_bits(bits))
}

/// Every slice with rows and columns swapped
pub fn transpose(planes: &Array3<f64>) -> Array3<f64> {
    planes
        .view()
        .permuted_axes([0, 2, 1])
        .as_standard_layout()
        .into_owned()
}

fn mean_square(values: ArrayView3<'_, f64>) -> f64 {
    values.mapv(|v| v * v).mean().unwrap_or(0.0)
}

/// Whether the image looks smoother when scanned column by column
///
/// Compares the squared mean squared difference along each axis, weighted by
/// the energy of the first column or row; ties keep the original orientation.
pub fn prefers_transposition(planes: &Array3<f64>) -> bool {
    let dx = &planes.slice(s![.., .., 1..]) - &planes.slice(s![.., .., ..-1]);
    let dy = &planes.slice(s![.., 1.., ..]) - &planes.slice(s![.., ..-1, ..]);
    let horizontal = mean_square(dx.view()).powi(2) * mean_square(planes.slice(s![.., .., 0..1]));
    let vertical = mean_square(dy.view()).powi(2) * mean_square(planes.slice(s![.., 0..1, ..]));
    vertical > horizontal
}
