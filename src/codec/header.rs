//! Header symbols coded ahead of the samples
//!
//! The header carries the image type, the transposition flag (only when
//! adaptive transposition is configured), the bit depth and the extents.
//! Each field is coded with the active back end and a model tailored to
//! its plausible values; extents later in the header are modelled around
//! the width.

use crate::codec::samples::ImageKind;
use crate::distribution::{Component, DistributionMaker, Law, LawParameters};
use crate::entropy::{Backend, EntropyCoder, SymbolModel};
use crate::io::configuration::{
    BackendKind, CoderConfig, DistributionKind, IMAGE_TYPE_COUNT, MAX_HEADER_BIT_DEPTH,
};
use crate::io::error::{Result, computation_error, unsupported_image};

/// Image description shared by encoder and decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Topology
    pub kind: ImageKind,
    /// Whether rows and columns were swapped before coding
    pub transposed: bool,
    /// Bits per sample
    pub bit_depth: u32,
    /// Columns of the coded planes
    pub width: u32,
    /// Rows of the coded planes
    pub height: u32,
    /// Slices of a volume or channels of a color image, 1 for gray images
    pub depth: u32,
}

impl Header {
    /// Largest sample value
    pub const fn maxval(&self) -> u32 {
        (1 << self.bit_depth) - 1
    }

    /// Shape `[slices, rows, cols]` of the coding layout
    pub const fn shape(&self) -> [usize; 3] {
        let slices = match self.kind {
            ImageKind::Color => self.depth as usize + 1,
            ImageKind::Gray | ImageKind::Volume => self.depth as usize,
        };
        [slices, self.height as usize, self.width as usize]
    }
}

// Owned model for one header field
enum FieldModel {
    Distribution(DistributionMaker),
    Laplacian { mean: f64, variance: f64, symbols: u32 },
}

impl FieldModel {
    fn symbol_model(&mut self) -> SymbolModel<'_> {
        match self {
            Self::Distribution(maker) => SymbolModel::Distribution(maker),
            Self::Laplacian {
                mean,
                variance,
                symbols,
            } => SymbolModel::Laplacian {
                mean: *mean,
                variance: *variance,
                symbols: *symbols,
            },
        }
    }
}

fn law(kind: DistributionKind, weight: f64, mean: f64, variance: f64, crop: u32) -> Component {
    Component::Law(Law::with_parameters(
        kind,
        &LawParameters::new(weight, mean, variance, 1.0),
        Some(crop),
    ))
}

/// Field-by-field header coding for one configuration
#[derive(Debug, Clone, Copy)]
pub struct HeaderCoder<'a> {
    config: &'a CoderConfig,
}

impl<'a> HeaderCoder<'a> {
    /// Header coding under `config`
    pub const fn new(config: &'a CoderConfig) -> Self {
        Self { config }
    }

    const fn backend(&self) -> BackendKind {
        self.config.backend
    }

    fn max_size(&self) -> u32 {
        self.config.max_image_size
    }

    // Weight of the uniform floor under the extent models
    fn extent_floor(&self) -> f64 {
        (f64::from(self.max_size()) + 1.0) / f64::from(1_u32 << (self.config.max_bits_per_pixel - 1))
    }

    fn kind_model(&self) -> FieldModel {
        match self.backend() {
            BackendKind::Arithmetic => FieldModel::Distribution(
                DistributionMaker::new(IMAGE_TYPE_COUNT + 1).with(law(
                    DistributionKind::Uniform,
                    1.0,
                    0.0,
                    1.0,
                    IMAGE_TYPE_COUNT - 1,
                )),
            ),
            BackendKind::Golomb => FieldModel::Laplacian {
                mean: f64::from(IMAGE_TYPE_COUNT / 2),
                variance: f64::from(IMAGE_TYPE_COUNT * IMAGE_TYPE_COUNT),
                symbols: IMAGE_TYPE_COUNT,
            },
        }
    }

    fn transposition_model(&self) -> FieldModel {
        match self.backend() {
            BackendKind::Arithmetic => FieldModel::Distribution(
                DistributionMaker::new(3).with(law(DistributionKind::Uniform, 1.0, 0.0, 1.0, 1)),
            ),
            BackendKind::Golomb => FieldModel::Laplacian {
                mean: 0.5,
                variance: 1.0,
                symbols: 2,
            },
        }
    }

    fn bit_depth_model(&self) -> FieldModel {
        match self.backend() {
            BackendKind::Arithmetic => FieldModel::Distribution(
                DistributionMaker::new(MAX_HEADER_BIT_DEPTH + 2).with(law(
                    DistributionKind::Laplace,
                    1.0,
                    8.0,
                    16.0,
                    MAX_HEADER_BIT_DEPTH,
                )),
            ),
            BackendKind::Golomb => FieldModel::Laplacian {
                mean: 8.0,
                variance: 16.0,
                symbols: MAX_HEADER_BIT_DEPTH + 1,
            },
        }
    }

    fn width_model(&self) -> FieldModel {
        let size = self.max_size();
        let spread = u64::from(size) * u64::from(size) / 81;
        match self.backend() {
            BackendKind::Arithmetic => FieldModel::Distribution(
                DistributionMaker::new(size + 2)
                    .with(law(DistributionKind::Laplace, 1.0, 0.0, spread as f64, size))
                    .with(law(DistributionKind::Uniform, 0.0, 0.0, 1.0, size)),
            ),
            BackendKind::Golomb => FieldModel::Laplacian {
                mean: f64::from(size / 9),
                variance: spread as f64,
                symbols: size + 1,
            },
        }
    }

    // Extents after the width, modelled around `mean` with the uniform floor
    fn extent_model(&self, mean: f64, variance: f64) -> FieldModel {
        let size = self.max_size();
        match self.backend() {
            BackendKind::Arithmetic => {
                let floor = self.extent_floor();
                FieldModel::Distribution(
                    DistributionMaker::new(size + 2)
                        .with(law(DistributionKind::Laplace, 1.0 - floor, mean, variance, size))
                        .with(law(DistributionKind::Uniform, floor, 0.0, 1.0, size)),
                )
            }
            BackendKind::Golomb => FieldModel::Laplacian {
                mean,
                variance,
                symbols: size + 1,
            },
        }
    }

    fn code(backend: &mut Backend, mut model: FieldModel, value: Option<u32>) -> Result<u32> {
        match value {
            Some(value) => {
                backend.encode(value, model.symbol_model())?;
                Ok(value)
            }
            None => backend.decode(model.symbol_model()),
        }
    }

    // Codes every field; `header` is `Some` when encoding
    fn code_fields(&self, backend: &mut Backend, header: Option<&Header>) -> Result<Header> {
        let kind = ImageKind::from_code(Self::code(
            backend,
            self.kind_model(),
            header.map(|h| h.kind.code()),
        )?)?;
        let transposed = if self.config.adaptive_transposition {
            Self::code(
                backend,
                self.transposition_model(),
                header.map(|h| u32::from(h.transposed)),
            )? == 1
        } else {
            false
        };
        let bit_depth = Self::code(backend, self.bit_depth_model(), header.map(|h| h.bit_depth))?;
        let width = Self::code(backend, self.width_model(), header.map(|h| h.width))?;
        let extent = f64::from(width);
        let height = Self::code(
            backend,
            self.extent_model(extent, extent * extent),
            header.map(|h| h.height),
        )?;
        let depth = match kind {
            ImageKind::Gray => 1,
            ImageKind::Volume => Self::code(
                backend,
                self.extent_model(extent, extent * extent),
                header.map(|h| h.depth),
            )?,
            ImageKind::Color => Self::code(
                backend,
                self.extent_model(3.0, 2.0),
                header.map(|h| h.depth),
            )?,
        };
        Ok(Header {
            kind,
            transposed,
            bit_depth,
            width,
            height,
            depth,
        })
    }

    /// Append `header` to the bitstream
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::UnsupportedImage`] if an extent exceeds the
    /// configured maximum image size or the bit depth exceeds 16, or
    /// propagates coding failures
    pub fn encode(&self, header: &Header, backend: &mut Backend) -> Result<()> {
        let size = self.max_size();
        if header.width > size || header.height > size || header.depth > size {
            return Err(unsupported_image(&format!(
                "extents {}x{}x{} exceed the maximum image size {size}",
                header.width, header.height, header.depth
            )));
        }
        if header.bit_depth == 0 || header.bit_depth > MAX_HEADER_BIT_DEPTH {
            return Err(unsupported_image(&format!(
                "{}-bit samples; at most {MAX_HEADER_BIT_DEPTH} bits are coded",
                header.bit_depth
            )));
        }
        self.code_fields(backend, Some(header)).map(|_| ())
    }

    /// Read a header from the bitstream
    ///
    /// # Errors
    ///
    /// Propagates decoding failures, and returns a computation error for
    /// empty extents or a zero bit depth
    pub fn decode(&self, backend: &mut Backend) -> Result<Header> {
        let header = self.code_fields(backend, None)?;
        if header.bit_depth == 0 || header.width == 0 || header.height == 0 || header.depth == 0 {
            return Err(computation_error(
                "header decoding",
                &format!(
                    "decoded {}-bit image of {}x{}x{}",
                    header.bit_depth, header.width, header.height, header.depth
                ),
            ));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(config: &CoderConfig, header: &Header) -> Result<Header> {
        let coder = HeaderCoder::new(config);
        let mut encoder = Backend::encoder(config.backend);
        coder.encode(header, &mut encoder)?;
        encoder.finalize();
        let mut decoder = Backend::decoder(config.backend, &encoder.to_bytes());
        coder.decode(&mut decoder)
    }

    #[test]
    fn test_headers_roundtrip_on_both_backends() -> Result<()> {
        let headers = [
            Header {
                kind: ImageKind::Gray,
                transposed: true,
                bit_depth: 8,
                width: 640,
                height: 480,
                depth: 1,
            },
            Header {
                kind: ImageKind::Color,
                transposed: false,
                bit_depth: 12,
                width: 3,
                height: 8000,
                depth: 4,
            },
            Header {
                kind: ImageKind::Volume,
                transposed: false,
                bit_depth: 1,
                width: 1,
                height: 1,
                depth: 300,
            },
        ];
        for backend in [BackendKind::Arithmetic, BackendKind::Golomb] {
            let config = CoderConfig {
                backend,
                ..CoderConfig::default()
            };
            for header in &headers {
                assert_eq!(&roundtrip(&config, header)?, header, "{backend}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_flag_is_skipped_without_adaptive_transposition() -> Result<()> {
        let config = CoderConfig {
            adaptive_transposition: false,
            ..CoderConfig::default()
        };
        let header = Header {
            kind: ImageKind::Gray,
            transposed: false,
            bit_depth: 8,
            width: 16,
            height: 16,
            depth: 1,
        };
        assert_eq!(roundtrip(&config, &header)?, header);
        Ok(())
    }

    #[test]
    fn test_oversized_images_are_rejected() {
        let config = CoderConfig {
            max_image_size: 100,
            ..CoderConfig::default()
        };
        let header = Header {
            kind: ImageKind::Gray,
            transposed: false,
            bit_depth: 8,
            width: 101,
            height: 10,
            depth: 1,
        };
        let mut backend = Backend::encoder(BackendKind::Arithmetic);
        assert!(HeaderCoder::new(&config).encode(&header, &mut backend).is_err());
    }
}
