//! Adaptive Rice-Golomb coder with run mode
//!
//! Samples are folded around the rounded prediction into non-negative
//! integers and written with a Golomb code whose parameter follows the
//! predicted variance. When the variance is tiny, zero residuals are counted
//! instead and the run length is written once the run breaks, or once it
//! reaches a cap relative to the run parameter.

use crate::entropy::bitqueue::BitQueue;
use crate::io::configuration::{
    GOLOMB_MAGIC_FACTOR, GOLOMB_MIN_VARIANCE, GOLOMB_RUN_CAP_FACTOR, GOLOMB_RUN_VARIANCE,
    GOLOMB_STRETCH, GOLOMB_STRETCH_SQUARED,
};
use crate::io::error::{Result, computation_error};
use std::f64::consts::FRAC_1_SQRT_2;

/// Golomb parameter matched to a residual variance
pub fn golomb_parameter(variance: f64) -> u32 {
    let parameter =
        (GOLOMB_MAGIC_FACTOR * ((GOLOMB_STRETCH_SQUARED + variance).sqrt() - GOLOMB_STRETCH)).ceil();
    (parameter.max(1.0) as u32).max(1)
}

/// Golomb parameter for run lengths at a residual variance
pub fn run_parameter(variance: f64) -> u32 {
    let zero_probability = 1.0 - (-FRAC_1_SQRT_2 / variance.sqrt()).exp();
    let parameter = (-1.0 / zero_probability.log2()).floor();
    if parameter.is_finite() {
        (parameter.max(1.0) as u32).max(1)
    } else {
        1
    }
}

fn rounded(mean: f64) -> u32 {
    (mean + 0.5).max(0.0) as u32
}

// Interleaves residuals so the side of the mean with more mass comes first
fn fold(symbol: u32, mean: f64) -> u32 {
    let prediction = rounded(mean);
    if f64::from(prediction) > mean {
        if symbol < prediction {
            2 * (prediction - symbol) - 1
        } else {
            2 * (symbol - prediction)
        }
    } else if symbol > prediction {
        2 * (symbol - prediction) - 1
    } else {
        2 * (prediction - symbol)
    }
}

fn unfold(folded: u32, mean: f64) -> Option<u32> {
    let prediction = rounded(mean);
    let below_first = f64::from(prediction) > mean;
    let odd = folded % 2 == 1;
    let step = folded.div_ceil(2);
    if odd == below_first {
        prediction.checked_sub(step)
    } else {
        prediction.checked_add(step)
    }
}

/// Rice-Golomb coder state
#[derive(Debug, Clone, Default)]
pub struct RiceGolombCoder {
    queue: BitQueue,
    run_length: u32,
    run_parameter: u32,
    run_capped: bool,
}

impl RiceGolombCoder {
    /// Encoder with an empty bitstream
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder over a stored bitstream
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            queue: BitQueue::from_bytes(bytes),
            ..Self::default()
        }
    }

    /// Underlying bit queue
    pub const fn queue(&self) -> &BitQueue {
        &self.queue
    }

    fn in_run_mode(&self, variance: f64) -> bool {
        self.run_length > 0 || variance < GOLOMB_RUN_VARIANCE
    }

    fn write(&mut self, value: u32, parameter: u32) {
        let quotient = value / parameter;
        let remainder = value % parameter;
        self.queue.push_repeated(true, quotient as usize);
        self.queue.push(false);

        let bits = parameter.ilog2();
        let threshold = (2 << bits) - parameter;
        let (code, width) = if remainder >= threshold {
            (remainder + threshold, bits + 1)
        } else {
            (remainder, bits)
        };
        for shift in (0..width).rev() {
            self.queue.push((code >> shift) & 1 == 1);
        }
    }

    fn read(&mut self, parameter: u32) -> Result<u32> {
        let mut quotient = 0_u32;
        while self.queue.read()? {
            quotient += 1;
        }

        let bits = parameter.ilog2();
        let mut remainder = 0_u32;
        for _ in 0..bits {
            remainder = (remainder << 1) | u32::from(self.queue.read()?);
        }
        let threshold = (2 << bits) - parameter;
        if remainder >= threshold {
            remainder = ((remainder << 1) | u32::from(self.queue.read()?)) - threshold;
        }
        quotient
            .checked_mul(parameter)
            .and_then(|value| value.checked_add(remainder))
            .ok_or_else(|| computation_error("golomb decoding", &"code word overflows 32 bits"))
    }

    /// Encode `symbol` against a Laplacian model centered at `mean`
    pub fn encode(&mut self, symbol: u32, mean: f64, variance: f64) {
        let mut folded = fold(symbol, mean);
        let mut parameter = golomb_parameter(variance);
        if self.in_run_mode(variance) {
            let variance = variance.max(GOLOMB_MIN_VARIANCE);
            parameter = golomb_parameter(variance);
            if self.run_length == 0 {
                self.run_parameter = run_parameter(variance);
            }
            if self.run_length >= GOLOMB_RUN_CAP_FACTOR * self.run_parameter {
                self.write(self.run_length, self.run_parameter);
                self.run_length = 0;
            } else if folded != 0 {
                self.write(self.run_length, self.run_parameter);
                self.run_length = 0;
                folded -= 1;
            } else {
                self.run_length += 1;
                return;
            }
        }
        self.write(folded, parameter);
    }

    /// Decode one symbol below `symbols` against a Laplacian model centered at `mean`
    ///
    /// # Errors
    ///
    /// Returns [`crate::CodecError::BitstreamUnderrun`] if the stream ends
    /// early, or a computation error if the code word lies outside the alphabet
    pub fn decode(&mut self, mean: f64, variance: f64, symbols: u32) -> Result<u32> {
        let folded = if self.in_run_mode(variance) {
            let variance = variance.max(GOLOMB_MIN_VARIANCE);
            if self.run_length == 0 {
                self.run_parameter = run_parameter(variance);
                self.run_length = self.read(self.run_parameter)? + 1;
                self.run_capped = self.run_length > GOLOMB_RUN_CAP_FACTOR * self.run_parameter;
            }
            self.run_length -= 1;
            if self.run_length > 0 {
                0
            } else {
                self.read(golomb_parameter(variance))? + u32::from(!self.run_capped)
            }
        } else {
            self.read(golomb_parameter(variance))?
        };
        self.queue.commit();

        unfold(folded, mean)
            .filter(|symbol| *symbol < symbols)
            .ok_or_else(|| {
                computation_error(
                    "golomb decoding",
                    &format!("code word {folded} around {mean} leaves 0..{symbols}"),
                )
            })
    }

    /// Flush a pending run
    pub fn finalize(&mut self) {
        if self.run_length > 0 {
            self.write(self.run_length, self.run_parameter);
            self.run_length = 0;
        }
    }

    /// Code length of `symbol` outside run mode, in bits
    pub fn costs(symbol: u32, mean: f64, variance: f64) -> f64 {
        let folded = fold(symbol, mean);
        let parameter = golomb_parameter(variance);
        let bits = parameter.ilog2();
        let threshold = (2 << bits) - parameter;
        let width = if folded % parameter >= threshold {
            bits + 1
        } else {
            bits
        };
        f64::from(folded / parameter + 1 + width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_prefers_the_heavier_side() {
        // Mean 9.7 rounds up to 10, so values below come first
        assert_eq!(fold(10, 9.7), 0);
        assert_eq!(fold(9, 9.7), 1);
        assert_eq!(fold(11, 9.7), 2);
        assert_eq!(fold(8, 9.7), 3);
        // Mean 10.2 rounds down, so values above come first
        assert_eq!(fold(11, 10.2), 1);
        assert_eq!(fold(9, 10.2), 2);
        for symbol in 0..40 {
            for mean in [0.0, 0.4, 7.5, 20.2, 39.0] {
                assert_eq!(unfold(fold(symbol, mean), mean), Some(symbol));
            }
        }
    }

    #[test]
    fn test_parameters_grow_with_variance() {
        assert_eq!(golomb_parameter(GOLOMB_MIN_VARIANCE), 1);
        assert_eq!(golomb_parameter(0.0), 1);
        assert!(golomb_parameter(100.0) > golomb_parameter(10.0));
        assert!(run_parameter(GOLOMB_MIN_VARIANCE) > run_parameter(1.0));
        assert_eq!(run_parameter(1.0), 1);
    }

    #[test]
    fn test_truncated_binary_remainders() -> Result<()> {
        let mut encoder = RiceGolombCoder::new();
        for parameter in 1..12 {
            for value in 0..30 {
                encoder.write(value, parameter);
            }
        }
        let mut decoder = RiceGolombCoder::from_bytes(&encoder.queue().to_bytes());
        for parameter in 1..12 {
            for value in 0..30 {
                assert_eq!(decoder.read(parameter)?, value);
            }
        }
        Ok(())
    }

    // Tests runs that end on a nonzero residual, hit the cap, or end the stream
    #[test]
    fn test_runs_roundtrip() -> Result<()> {
        let mut samples = Vec::new();
        samples.extend([5, 5, 5, 6, 5, 5, 4]);
        samples.extend(std::iter::repeat_n(5, 200));
        samples.extend([9, 5, 2, 5, 5]);
        samples.extend(std::iter::repeat_n(5, 15));
        let models = |i: usize| {
            let variance = if i % 50 < 45 { 0.05 } else { 30.0 };
            (5.0, variance)
        };

        let mut encoder = RiceGolombCoder::new();
        for (i, sample) in samples.iter().enumerate() {
            let (mean, variance) = models(i);
            encoder.encode(*sample, mean, variance);
        }
        encoder.finalize();

        let mut decoder = RiceGolombCoder::from_bytes(&encoder.queue().to_bytes());
        for (i, sample) in samples.iter().enumerate() {
            let (mean, variance) = models(i);
            assert_eq!(decoder.decode(mean, variance, 256)?, *sample, "sample {i}");
        }
        Ok(())
    }

    #[test]
    fn test_wide_residuals_roundtrip() -> Result<()> {
        let samples: Vec<u32> = (0..300).map(|i| (i * 71) % 256).collect();
        let mut encoder = RiceGolombCoder::new();
        for (i, sample) in samples.iter().enumerate() {
            encoder.encode(*sample, f64::from(i as u32 % 256), 400.0);
        }
        encoder.finalize();

        let mut decoder = RiceGolombCoder::from_bytes(&encoder.queue().to_bytes());
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(decoder.decode(f64::from(i as u32 % 256), 400.0, 256)?, *sample);
        }
        Ok(())
    }

    #[test]
    fn test_long_streams_release_decoded_bits() -> Result<()> {
        let samples: Vec<u32> = (0..20_000).map(|i| (i * 37) % 256).collect();
        let mut encoder = RiceGolombCoder::new();
        for sample in &samples {
            encoder.encode(*sample, 128.0, 400.0);
        }
        encoder.finalize();

        let mut decoder = RiceGolombCoder::from_bytes(&encoder.queue().to_bytes());
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(decoder.decode(128.0, 400.0, 256)?, *sample, "sample {i}");
        }
        assert!(decoder.queue().stored() * 2 < decoder.queue().len());
        Ok(())
    }

    #[test]
    fn test_costs_count_code_bits() {
        assert!(RiceGolombCoder::costs(5, 5.0, 400.0) < RiceGolombCoder::costs(90, 5.0, 400.0));
        assert_eq!(RiceGolombCoder::costs(3, 3.0, GOLOMB_MIN_VARIANCE), 1.0);
        assert!(RiceGolombCoder::costs(40, 3.0, 4.0) > RiceGolombCoder::costs(4, 3.0, 4.0));
    }
}
