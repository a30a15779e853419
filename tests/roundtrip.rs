//! Encodes and decodes gray, color and volume images across model combinations

use ndarray::Array3;
use pixelfit::Result;
use pixelfit::codec::{Coder, HeaderCoder, ImageKind, RawImage, SampleDepth};
use pixelfit::entropy::{Backend, EntropyCoder};
use pixelfit::io::configuration::{
    BackendKind, CoderConfig, DistributionKind, InterChannel, MED_NEIGHBORHOOD, PredictorKind,
    Radii, VarianceKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// Smooth ramp with a few levels of noise on top
fn textured(planes: usize, rows: usize, cols: usize, maxval: u16, seed: u64) -> Array3<u16> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((planes, rows, cols), |(z, y, x)| {
        let ramp = (7 * x + 4 * y + 11 * z) as u16;
        let noise: u16 = rng.random_range(0..4);
        (ramp + noise) % (maxval + 1)
    })
}

fn gray(rows: usize, cols: usize, seed: u64) -> Result<RawImage> {
    RawImage::new(
        ImageKind::Gray,
        textured(1, rows, cols, 255, seed),
        SampleDepth::Eight,
    )
}

fn small(config: CoderConfig) -> CoderConfig {
    CoderConfig {
        training_size: 4,
        ..config
    }
}

fn assert_roundtrip(config: CoderConfig, image: &RawImage) -> Result<usize> {
    let label = format!(
        "{} / {} / {} / {}",
        config.predictor, config.variance, config.distribution, config.backend
    );
    let coder = Coder::new(config)?;
    let bytes = coder.encode(image)?;
    let decoded = coder.decode(&bytes)?;
    assert_eq!(&decoded, image, "{label}");
    Ok(bytes.len())
}

fn predictor_config(predictor: PredictorKind) -> CoderConfig {
    let neighborhood = if predictor == PredictorKind::Med {
        Radii::from_array(MED_NEIGHBORHOOD)
    } else {
        Radii::default()
    };
    small(CoderConfig {
        predictor,
        neighborhood,
        ..CoderConfig::default()
    })
}

const PREDICTORS: [PredictorKind; 6] = [
    PredictorKind::Mean,
    PredictorKind::Med,
    PredictorKind::Nlm,
    PredictorKind::Ls,
    PredictorKind::Wls,
    PredictorKind::FastLs,
];

#[test]
fn test_every_predictor_roundtrips() -> Result<()> {
    let image = gray(11, 13, 1)?;
    for predictor in PREDICTORS {
        assert_roundtrip(predictor_config(predictor), &image)?;
    }
    Ok(())
}

#[test]
fn test_variance_and_distribution_combinations_roundtrip() -> Result<()> {
    let image = gray(9, 10, 2)?;
    for predictor in [PredictorKind::Med, PredictorKind::Wls] {
        for variance in [
            VarianceKind::Exponential,
            VarianceKind::Residual,
            VarianceKind::Ls,
        ] {
            for distribution in [
                DistributionKind::Normal,
                DistributionKind::Laplace,
                DistributionKind::StudentT,
                DistributionKind::Uniform,
            ] {
                let config = CoderConfig {
                    variance,
                    distribution,
                    ..predictor_config(predictor)
                };
                assert_roundtrip(config, &image)?;
            }
        }
    }
    Ok(())
}

#[test]
fn test_regularization_laws_roundtrip() -> Result<()> {
    let image = gray(8, 8, 3)?;
    for regularization in [
        DistributionKind::Normal,
        DistributionKind::Laplace,
        DistributionKind::Uniform,
    ] {
        let config = CoderConfig {
            regularization,
            ..predictor_config(PredictorKind::Ls)
        };
        assert_roundtrip(config, &image)?;
    }
    Ok(())
}

#[test]
fn test_golomb_backend_roundtrips() -> Result<()> {
    let image = gray(10, 12, 4)?;
    for predictor in PREDICTORS {
        let config = CoderConfig {
            backend: BackendKind::Golomb,
            sparsify: 0.0,
            ..predictor_config(predictor)
        };
        assert_roundtrip(config, &image)?;
    }

    // Flat areas exercise run mode
    let flat = RawImage::new(
        ImageKind::Gray,
        Array3::from_shape_fn((1, 16, 16), |(_, y, _)| if y < 8 { 40 } else { 41 }),
        SampleDepth::Eight,
    )?;
    let config = CoderConfig {
        backend: BackendKind::Golomb,
        ..predictor_config(PredictorKind::Med)
    };
    assert_roundtrip(config, &flat)?;
    Ok(())
}

#[test]
fn test_color_images_roundtrip_with_inter_channel_prediction() -> Result<()> {
    let samples = textured(3, 8, 9, 255, 5);
    let image = RawImage::new(ImageKind::Color, samples, SampleDepth::Eight)?;
    for inter_channel in [
        InterChannel::Off,
        InterChannel::CoLocated,
        InterChannel::Forward,
    ] {
        let config = CoderConfig {
            inter_channel,
            ..predictor_config(PredictorKind::Wls)
        };
        assert_roundtrip(config, &image)?;
    }

    let with_alpha = RawImage::new(
        ImageKind::Color,
        textured(4, 6, 7, 255, 6),
        SampleDepth::Eight,
    )?;
    assert_roundtrip(predictor_config(PredictorKind::Ls), &with_alpha)?;
    Ok(())
}

#[test]
fn test_volumes_roundtrip() -> Result<()> {
    let image = RawImage::new(
        ImageKind::Volume,
        textured(3, 7, 8, 255, 7),
        SampleDepth::Eight,
    )?;
    let volumetric = Radii {
        bottom: 1.5,
        front: 1.5,
        ..Radii::circle(1.5)
    };
    for predictor in [PredictorKind::Ls, PredictorKind::FastLs, PredictorKind::Mean] {
        let config = CoderConfig {
            neighborhood: volumetric,
            training_size_3d: 1,
            ..predictor_config(predictor)
        };
        assert_roundtrip(config, &image)?;
    }
    // Slices coded independently
    assert_roundtrip(predictor_config(PredictorKind::Wls), &image)?;
    Ok(())
}

#[test]
fn test_sixteen_bit_images_roundtrip() -> Result<()> {
    let samples = textured(1, 9, 9, 4095, 8).mapv(|v| v * 40);
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Sixteen)?;
    assert_eq!(image.bit_depth(), 12);
    assert_roundtrip(predictor_config(PredictorKind::Wls), &image)?;

    let golomb = CoderConfig {
        backend: BackendKind::Golomb,
        ..predictor_config(PredictorKind::Med)
    };
    assert_roundtrip(golomb, &image)?;
    Ok(())
}

#[test]
fn test_single_sample_and_binary_images_roundtrip() -> Result<()> {
    let single = RawImage::new(
        ImageKind::Gray,
        Array3::from_elem((1, 1, 1), 200),
        SampleDepth::Eight,
    )?;
    assert_roundtrip(CoderConfig::default(), &single)?;

    let binary = RawImage::new(
        ImageKind::Gray,
        Array3::from_shape_fn((1, 6, 5), |(_, y, x)| ((x + y) % 2) as u16),
        SampleDepth::Eight,
    )?;
    assert_eq!(binary.bit_depth(), 1);
    assert_roundtrip(CoderConfig::default(), &binary)?;
    Ok(())
}

#[test]
fn test_transposed_images_roundtrip() -> Result<()> {
    // Horizontal stripes are smoother along columns
    let stripes = RawImage::new(
        ImageKind::Gray,
        Array3::from_shape_fn((1, 8, 12), |(_, y, x)| (x * 20 + y) as u16),
        SampleDepth::Eight,
    )?;
    for adaptive_transposition in [true, false] {
        let config = CoderConfig {
            adaptive_transposition,
            ..predictor_config(PredictorKind::Ls)
        };
        assert_roundtrip(config, &stripes)?;
    }
    Ok(())
}

#[test]
fn test_first_prediction_is_mid_range() -> Result<()> {
    let image = gray(5, 5, 9)?;
    for predictor in PREDICTORS {
        let maps = Coder::new(predictor_config(predictor))?.predict(&image)?;
        let expected = f64::from(1_u32 << (image.bit_depth() - 1));
        assert!(
            (maps.prediction[[0, 0, 0]] - expected).abs() < f64::EPSILON,
            "{predictor}: {}",
            maps.prediction[[0, 0, 0]]
        );
    }
    Ok(())
}

#[test]
fn test_med_scenario_matches_model_cost() -> Result<()> {
    let samples = Array3::from_shape_fn((1, 8, 8), |(_, y, x)| (x * 30 + y * 3) as u16);
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight)?;
    assert_eq!(image.bit_depth(), 8);
    let config = CoderConfig {
        variance: VarianceKind::Exponential,
        distribution: DistributionKind::Normal,
        adaptive_transposition: false,
        ..predictor_config(PredictorKind::Med)
    };
    let coder = Coder::new(config.clone())?;
    let bytes = coder.encode(&image)?;
    assert_eq!(coder.decode(&bytes)?, image);

    let mut header_only = Backend::encoder(BackendKind::Arithmetic);
    let header = pixelfit::codec::Header {
        kind: ImageKind::Gray,
        transposed: false,
        bit_depth: 8,
        width: 8,
        height: 8,
        depth: 1,
    };
    HeaderCoder::new(&config).encode(&header, &mut header_only)?;
    header_only.finalize();
    let header_bits = header_only.queue().len() as f64;

    let sample_bits: f64 = coder.predict(&image)?.bits.sum();
    let coded_bits = coder.encoded_bits(&image)? as f64;
    assert!(coded_bits <= bytes.len() as f64 * 8.0);
    // Each finalized stream carries up to two bits beyond its information content
    let expected = header_bits + sample_bits;
    assert!(
        (coded_bits - expected).abs() <= 4.0,
        "{coded_bits} bits coded, {expected:.2} expected"
    );
    Ok(())
}

// Even samples drawn from a small palette, with no smooth structure
fn even_palette(rows: usize, cols: usize, seed: u64) -> Result<RawImage> {
    const PALETTE: [u16; 8] = [40, 44, 52, 60, 64, 72, 80, 88];
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = Array3::from_shape_fn((1, rows, cols), |(_, y, x)| {
        let index = (x / 3 + y / 2 + rng.random_range(0..3)) % PALETTE.len();
        PALETTE.get(index).copied().unwrap_or_default()
    });
    RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight)
}

#[test]
fn test_sparsification_pays_off_on_even_images() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(10);
    let samples = Array3::from_shape_fn((1, 16, 16), |(_, y, x)| {
        let base = 60 + 4 * x + 2 * y;
        let jitter: usize = rng.random_range(0..3);
        (2 * ((base + jitter) / 2)) as u16
    });
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight)?;
    let plain = assert_roundtrip(
        CoderConfig {
            sparsify: 0.0,
            ..predictor_config(PredictorKind::Med)
        },
        &image,
    )?;
    let sparse = assert_roundtrip(
        CoderConfig {
            sparsify: 1000.0,
            ..predictor_config(PredictorKind::Med)
        },
        &image,
    )?;
    assert!(sparse < plain, "sparse {sparse} bytes, plain {plain} bytes");
    Ok(())
}

#[test]
fn test_sparsification_confines_palette_images() -> Result<()> {
    let image = even_palette(20, 20, 13)?;
    let plain = CoderConfig {
        sparsify: 0.0,
        ..CoderConfig::default()
    };
    let sparse = CoderConfig {
        sparsify: 1000.0,
        ..CoderConfig::default()
    };
    assert_roundtrip(plain.clone(), &image)?;
    assert_roundtrip(sparse.clone(), &image)?;

    let plain_bits = Coder::new(plain)?.encoded_bits(&image)?;
    let sparse_bits = Coder::new(sparse)?.encoded_bits(&image)?;
    assert!(
        sparse_bits * 10 < plain_bits * 8,
        "sparse {sparse_bits} bits, plain {plain_bits} bits"
    );
    Ok(())
}

// Quadratic texture that leaves no plane for the regression to fit
fn irregular(rows: usize, cols: usize, seed: u64) -> Result<RawImage> {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = Array3::from_shape_fn((1, rows, cols), |(_, y, x)| {
        let structure = (x * x + 3 * y) % 256;
        let noise: usize = rng.random_range(0..24);
        ((structure + noise) % 256) as u16
    });
    RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight)
}

fn default_config(predictor: PredictorKind) -> CoderConfig {
    let neighborhood = if predictor == PredictorKind::Med {
        Radii::from_array(MED_NEIGHBORHOOD)
    } else {
        Radii::default()
    };
    CoderConfig {
        predictor,
        neighborhood,
        ..CoderConfig::default()
    }
}

#[test]
fn test_default_configuration_roundtrips_wrapping_texture() -> Result<()> {
    let samples = Array3::from_shape_fn((1, 24, 26), |(_, y, x)| ((x * x + y * 3) % 256) as u16);
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight)?;
    assert_roundtrip(CoderConfig::default(), &image)?;

    let transposed = RawImage::new(
        ImageKind::Gray,
        Array3::from_shape_fn((1, 26, 24), |(_, y, x)| ((y * y + x * 3) % 256) as u16),
        SampleDepth::Eight,
    )?;
    assert_roundtrip(CoderConfig::default(), &transposed)?;
    Ok(())
}

#[test]
fn test_default_configuration_matrix_on_irregular_images() -> Result<()> {
    for (seed, (rows, cols)) in [(21, (13, 15)), (22, (9, 17))] {
        let image = irregular(rows, cols, seed)?;
        for predictor in PREDICTORS {
            for variance in [
                VarianceKind::Exponential,
                VarianceKind::Residual,
                VarianceKind::Ls,
            ] {
                for backend in [BackendKind::Arithmetic, BackendKind::Golomb] {
                    let config = CoderConfig {
                        variance,
                        backend,
                        ..default_config(predictor)
                    };
                    assert_roundtrip(config, &image)?;
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_fast_least_squares_agrees_with_direct_accumulation() -> Result<()> {
    let image = irregular(14, 18, 23)?;
    let direct = Coder::new(predictor_config(PredictorKind::Ls))?.predict(&image)?;
    let fast = Coder::new(predictor_config(PredictorKind::FastLs))?.predict(&image)?;
    assert_eq!(direct.prediction.dim(), fast.prediction.dim());
    for ((position, a), b) in direct.prediction.indexed_iter().zip(fast.prediction.iter()) {
        assert!((a - b).abs() < 1e-3, "{position:?}: {a} vs {b}");
    }
    Ok(())
}

#[test]
fn test_ten_bit_samples_roundtrip_with_sparsification() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(24);
    let samples = Array3::from_shape_fn((1, 10, 11), |(_, y, x)| {
        let level: u16 = rng.random_range(0..4);
        (4 * (x * 23 + y * 17) as u16 + level * 4) % 1024
    });
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Sixteen)?;
    assert_eq!(image.bit_depth(), 10);
    assert_roundtrip(CoderConfig::default(), &image)?;
    Ok(())
}

#[test]
fn test_full_range_sixteen_bit_samples_roundtrip() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(25);
    let samples = Array3::from_shape_fn((1, 7, 8), |(_, y, x)| {
        let noise: u16 = rng.random_range(0..512);
        ((x * 8000 + y * 1500) as u16).wrapping_add(noise)
    });
    let image = RawImage::new(ImageKind::Gray, samples, SampleDepth::Sixteen)?;
    assert_eq!(image.bit_depth(), 16);
    assert_roundtrip(CoderConfig::default(), &image)?;
    Ok(())
}

#[test]
fn test_truncated_bitstreams_are_rejected() -> Result<()> {
    let image = gray(10, 10, 12)?;
    let coder = Coder::new(predictor_config(PredictorKind::Med))?;
    let bytes = coder.encode(&image)?;
    assert!(coder.decode(bytes.get(..bytes.len() / 3).unwrap_or_default()).is_err());
    Ok(())
}
