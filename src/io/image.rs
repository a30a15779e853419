//! Conversion between image files and [`RawImage`] samples
//!
//! Any format the `image` crate decodes is accepted as long as its samples
//! are unsigned 8- or 16-bit integers. Gray images map to a single plane;
//! everything with more than one channel is treated as a color image whose
//! channels become planes in storage order. Decoded images are written as PNG.

use crate::codec::{ImageKind, RawImage, SampleDepth};
use crate::io::error::{
    CodecError, Result, computation_error, invalid_parameter, unsupported_image,
};
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};
use ndarray::Array3;
use num_traits::{PrimInt, ToPrimitive, Unsigned};
use std::path::Path;
use std::str::FromStr;

/// Layout of a headerless volume file, written `BITSxWIDTHxHEIGHTxDEPTH`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDimensions {
    /// Storage width of one sample
    pub container: SampleDepth,
    /// Columns per slice
    pub width: usize,
    /// Rows per slice
    pub height: usize,
    /// Slices
    pub depth: usize,
}

impl FromStr for RawDimensions {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| invalid_parameter("dimensions", &s, &reason);
        let fields = s
            .split('x')
            .map(|field| field.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid(&format!("expected BITSxWIDTHxHEIGHTxDEPTH ({e})")))?;
        let &[bits, width, height, depth] = fields.as_slice() else {
            return Err(invalid("expected four fields"));
        };
        let container = match bits {
            8 => SampleDepth::Eight,
            16 => SampleDepth::Sixteen,
            _ => return Err(invalid("samples must be 8 or 16 bits wide")),
        };
        Ok(Self {
            container,
            width,
            height,
            depth,
        })
    }
}

fn file_error(
    path: &Path,
    operation: &'static str,
) -> impl FnOnce(std::io::Error) -> CodecError + use<> {
    let path = path.to_path_buf();
    move |source| CodecError::FileSystem {
        path,
        operation,
        source,
    }
}

/// Load a headerless volume of 8-bit or little-endian 16-bit samples
///
/// # Errors
///
/// Returns [`CodecError::FileSystem`] if the file cannot be read, or
/// [`CodecError::UnsupportedImage`] if its size does not match `dimensions`
pub fn load_raw(path: &Path, dimensions: RawDimensions) -> Result<RawImage> {
    let bytes = std::fs::read(path).map_err(file_error(path, "read volume"))?;
    let count = dimensions.width * dimensions.height * dimensions.depth;
    let samples: Vec<u16> = match dimensions.container {
        SampleDepth::Eight => bytes.iter().copied().map(u16::from).collect(),
        SampleDepth::Sixteen => bytes
            .chunks_exact(2)
            .map(|pair| pair.try_into().map_or(0, u16::from_le_bytes))
            .collect(),
    };
    if samples.len() != count {
        return Err(unsupported_image(&format!(
            "{} holds {} samples, {count} expected",
            path.display(),
            samples.len()
        )));
    }
    let shape = (dimensions.depth, dimensions.height, dimensions.width);
    let samples = Array3::from_shape_vec(shape, samples).map_err(|e| unsupported_image(&e))?;
    RawImage::new(ImageKind::Volume, samples, dimensions.container)
}

/// Save samples as a headerless file, 16-bit samples little-endian
///
/// # Errors
///
/// Returns [`CodecError::FileSystem`] if the file cannot be written
pub fn save_raw(image: &RawImage, path: &Path) -> Result<()> {
    let bytes: Vec<u8> = match image.container() {
        SampleDepth::Eight => image
            .samples()
            .iter()
            .map(|v| v.to_u8().unwrap_or(u8::MAX))
            .collect(),
        SampleDepth::Sixteen => image
            .samples()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
    };
    std::fs::write(path, bytes).map_err(file_error(path, "write volume"))
}

// Planes `[channel, row, col]` of an interleaved image buffer
fn buffer_planes<P>(buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> Array3<P::Subpixel>
where
    P: Pixel,
    P::Subpixel: PrimInt + Unsigned,
{
    let channels = usize::from(P::CHANNEL_COUNT);
    let (width, height) = buffer.dimensions();
    Array3::from_shape_fn((channels, height as usize, width as usize), |(c, y, x)| {
        buffer
            .get_pixel(x as u32, y as u32)
            .channels()
            .get(c)
            .copied()
            .unwrap_or_else(num_traits::zero)
    })
}

fn from_buffer<P>(kind: ImageKind, buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> Result<RawImage>
where
    P: Pixel,
    P::Subpixel: PrimInt + Unsigned + ToPrimitive,
{
    RawImage::from_samples(kind, buffer_planes(buffer).view())
}

/// Samples of a decoded image
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedImage`] for floating-point images or
/// images without samples
pub fn raw_from_dynamic(image: &DynamicImage) -> Result<RawImage> {
    match image {
        DynamicImage::ImageLuma8(buffer) => from_buffer(ImageKind::Gray, buffer),
        DynamicImage::ImageLuma16(buffer) => from_buffer(ImageKind::Gray, buffer),
        DynamicImage::ImageLumaA8(buffer) => from_buffer(ImageKind::Color, buffer),
        DynamicImage::ImageLumaA16(buffer) => from_buffer(ImageKind::Color, buffer),
        DynamicImage::ImageRgb8(buffer) => from_buffer(ImageKind::Color, buffer),
        DynamicImage::ImageRgb16(buffer) => from_buffer(ImageKind::Color, buffer),
        DynamicImage::ImageRgba8(buffer) => from_buffer(ImageKind::Color, buffer),
        DynamicImage::ImageRgba16(buffer) => from_buffer(ImageKind::Color, buffer),
        other => Err(unsupported_image(&format!(
            "{:?} samples; only unsigned 8- and 16-bit images are coded",
            other.color()
        ))),
    }
}

/// Load an image file
///
/// # Errors
///
/// Returns [`CodecError::ImageLoad`] if the file cannot be read or decoded,
/// or [`CodecError::UnsupportedImage`] for sample types the coder rejects
pub fn load_image(path: &Path) -> Result<RawImage> {
    let image = image::open(path).map_err(|source| CodecError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    raw_from_dynamic(&image)
}

fn interleave<P>(
    image: &RawImage,
    convert: impl Fn(u16) -> P::Subpixel,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel,
{
    let samples = image.samples();
    let channels = usize::from(P::CHANNEL_COUNT);
    let (width, height) = (image.width(), image.height());
    let mut data = Vec::with_capacity(width * height * channels);
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                data.push(convert(samples[[c, y, x]]));
            }
        }
    }
    ImageBuffer::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| computation_error("image export", &"sample count does not match the extents"))
}

/// Image buffer holding the samples of a gray or color image
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedImage`] for volumes or color images with
/// more than four channels
pub fn dynamic_from_raw(image: &RawImage) -> Result<DynamicImage> {
    let narrow = |v: u16| v.to_u8().unwrap_or(u8::MAX);
    let wide = |v: u16| v;
    let planes = image.planes();
    let dynamic = match (image.kind(), planes, image.container()) {
        (ImageKind::Gray, 1, SampleDepth::Eight) => {
            DynamicImage::ImageLuma8(interleave::<Luma<u8>>(image, narrow)?)
        }
        (ImageKind::Gray, 1, SampleDepth::Sixteen) => {
            DynamicImage::ImageLuma16(interleave::<Luma<u16>>(image, wide)?)
        }
        (ImageKind::Color, 2, SampleDepth::Eight) => {
            DynamicImage::ImageLumaA8(interleave::<LumaA<u8>>(image, narrow)?)
        }
        (ImageKind::Color, 2, SampleDepth::Sixteen) => {
            DynamicImage::ImageLumaA16(interleave::<LumaA<u16>>(image, wide)?)
        }
        (ImageKind::Color, 3, SampleDepth::Eight) => {
            DynamicImage::ImageRgb8(interleave::<Rgb<u8>>(image, narrow)?)
        }
        (ImageKind::Color, 3, SampleDepth::Sixteen) => {
            DynamicImage::ImageRgb16(interleave::<Rgb<u16>>(image, wide)?)
        }
        (ImageKind::Color, 4, SampleDepth::Eight) => {
            DynamicImage::ImageRgba8(interleave::<Rgba<u8>>(image, narrow)?)
        }
        (ImageKind::Color, 4, SampleDepth::Sixteen) => {
            DynamicImage::ImageRgba16(interleave::<Rgba<u16>>(image, wide)?)
        }
        (kind, planes, _) => {
            return Err(unsupported_image(&format!(
                "{kind} image with {planes} planes has no PNG layout"
            )));
        }
    };
    Ok(dynamic)
}

/// Save a gray or color image as PNG
///
/// # Errors
///
/// Returns [`CodecError::FileSystem`] if the parent directory cannot be
/// created, [`CodecError::ImageExport`] if encoding or writing fails, or
/// [`CodecError::UnsupportedImage`] for layouts PNG cannot hold
pub fn save_image(image: &RawImage, path: &Path) -> Result<()> {
    let dynamic = dynamic_from_raw(image)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CodecError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create directory",
            source,
        })?;
    }
    dynamic
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| CodecError::ImageExport {
            path: path.to_path_buf(),
            source,
        })
}
