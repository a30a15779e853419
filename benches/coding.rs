//! Performance measurement for encoding and decoding across predictors

// Criterion macros generate undocumented functions
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::Array3;
use pixelfit::codec::{Coder, ImageKind, RawImage, SampleDepth};
use pixelfit::entropy::ArithmeticCoder;
use pixelfit::distribution::{Component, DistributionMaker, Law, LawParameters};
use pixelfit::io::configuration::{
    CoderConfig, DistributionKind, MED_NEIGHBORHOOD, PredictorKind, Radii,
};
use std::hint::black_box;

fn test_image() -> Option<RawImage> {
    let samples = Array3::from_shape_fn((1, 32, 32), |(_, y, x)| {
        ((x * 5 + y * 3) ^ (x * y % 7)) as u16 % 256
    });
    RawImage::new(ImageKind::Gray, samples, SampleDepth::Eight).ok()
}

fn config(predictor: PredictorKind) -> CoderConfig {
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

/// Measures full-image encoding cost per predictor
fn bench_encode(c: &mut Criterion) {
    let Some(image) = test_image() else {
        return;
    };
    let mut group = c.benchmark_group("encode");
    group.sample_size(10);

    for predictor in [
        PredictorKind::Med,
        PredictorKind::Ls,
        PredictorKind::Wls,
        PredictorKind::FastLs,
    ] {
        let Ok(coder) = Coder::new(config(predictor)) else {
            continue;
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(predictor),
            &image,
            |b, image| {
                b.iter(|| black_box(coder.encode(black_box(image))));
            },
        );
    }

    group.finish();
}

/// Measures decoding of a WLS bitstream
fn bench_decode(c: &mut Criterion) {
    let Some(image) = test_image() else {
        return;
    };
    let Ok(coder) = Coder::new(config(PredictorKind::Wls)) else {
        return;
    };
    let Ok(bytes) = coder.encode(&image) else {
        return;
    };
    let mut group = c.benchmark_group("decode");
    group.sample_size(10);
    group.bench_function("WLS", |b| {
        b.iter(|| black_box(coder.decode(black_box(&bytes))));
    });
    group.finish();
}

/// Measures arithmetic coding of symbols against a Student's t mixture
fn bench_arithmetic_symbols(c: &mut Criterion) {
    c.bench_function("arithmetic_symbols", |b| {
        b.iter(|| {
            let mut coder = ArithmeticCoder::new();
            for symbol in 0..256_u32 {
                let mut maker = DistributionMaker::new(257)
                    .with(Component::Law(Law::with_parameters(
                        DistributionKind::StudentT,
                        &LawParameters::new(0.999, f64::from(symbol), 25.0, 4.0),
                        None,
                    )))
                    .with(Component::Law(Law::with_parameters(
                        DistributionKind::Uniform,
                        &LawParameters::new(0.001, 0.0, 1.0, 1.0),
                        Some(255),
                    )));
                black_box(coder.encode(black_box(symbol), &mut maker)).ok();
            }
            coder.finalize();
            black_box(coder.queue().len())
        });
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_arithmetic_symbols
);
criterion_main!(benches);
