//! Binary arithmetic coder over a 31-bit integer range
//!
//! The encoder keeps the interval `[low, high)` and renormalizes with the
//! usual three zoom steps: lower half, upper half and middle half. Middle
//! zooms are deferred as pending bits that are emitted, inverted, after the
//! next resolved bit. The decoder mirrors this on the bit queue: it reads
//! ahead until one symbol interval contains every continuation of the bits,
//! then pops exactly the bits the encoder resolved.

use crate::distribution::DistributionMaker;
use crate::entropy::bitqueue::BitQueue;
use crate::io::configuration::{RANGE_HALF, RANGE_MAX, RANGE_QUARTER, RANGE_THREE_QUARTERS};
use crate::io::error::{CodecError, Result, computation_error};

/// Range coder state shared by encoding and decoding
#[derive(Debug, Clone)]
pub struct ArithmeticCoder {
    queue: BitQueue,
    low: u32,
    high: u32,
    zoom: usize,
}

impl Default for ArithmeticCoder {
    fn default() -> Self {
        Self::new()
    }
}

// First index in `start..end` for which `predicate` fails, assuming it
// holds on a prefix of the range
fn partition_point(start: u32, end: u32, mut predicate: impl FnMut(u32) -> bool) -> u32 {
    let (mut lo, mut hi) = (start, end);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if predicate(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

impl ArithmeticCoder {
    /// Encoder with an empty bitstream
    pub fn new() -> Self {
        Self::from_queue(BitQueue::new())
    }

    /// Decoder over a stored bitstream
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_queue(BitQueue::from_bytes(bytes))
    }

    // Symbol interval of `symbol`, checked against the current interval
    fn interval(&self, symbol: u32, maker: &DistributionMaker, stage: &'static str) -> Result<(u32, u32)> {
        let low = maker.element(symbol).range_value();
        let high = maker.element(symbol + 1).range_value();
        if low < self.low || high > self.high || high < low {
            return Err(computation_error(
                stage,
                &format!(
                    "symbol {symbol} maps to [{low}, {high}) outside the interval [{}, {})",
                    self.low, self.high
                ),
            ));
        }
        if high == low {
            return Err(CodecError::ZeroProbability {
                symbol,
                position: None,
            });
        }
        Ok((low, high))
    }

    const fn from_queue(queue: BitQueue) -> Self {
        Self {
            queue,
            low: 0,
            high: RANGE_MAX,
            zoom: 0,
        }
    }

    /// Underlying bit queue
    pub const fn queue(&self) -> &BitQueue {
        &self.queue
    }

    // Maps the current interval onto the distribution boundaries
    fn bind(&self, maker: &mut DistributionMaker) {
        maker.set_range(self.low, self.high - self.low);
    }

    fn emit(&mut self, bit: bool) {
        self.queue.push(bit);
        self.queue.push_repeated(!bit, self.zoom);
        self.zoom = 0;
    }

    fn renormalize(&mut self, mut resolved: impl FnMut(&mut Self, bool)) {
        loop {
            if self.high <= RANGE_HALF {
                resolved(self, false);
                self.low <<= 1;
                self.high <<= 1;
            } else if self.low >= RANGE_HALF {
                resolved(self, true);
                self.low = (self.low - RANGE_HALF) << 1;
                self.high = (self.high - RANGE_HALF) << 1;
            } else if self.low >= RANGE_QUARTER && self.high <= RANGE_THREE_QUARTERS {
                self.zoom += 1;
                self.low = (self.low - RANGE_QUARTER) << 1;
                self.high = (self.high - RANGE_QUARTER) << 1;
            } else {
                break;
            }
        }
    }

    /// Encode `symbol` with the boundaries of `maker`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ZeroProbability`] if the symbol interval is empty
    /// at the current resolution, or a computation error if the boundaries
    /// are decreasing or leave the current interval
    pub fn encode(&mut self, symbol: u32, maker: &mut DistributionMaker) -> Result<()> {
        if symbol >= maker.symbols() {
            return Err(CodecError::ZeroProbability {
                symbol,
                position: None,
            });
        }
        self.bind(maker);
        let (low, high) = self.interval(symbol, maker, "arithmetic encoding")?;
        self.low = low;
        self.high = high;
        self.renormalize(|coder, bit| coder.emit(bit));
        Ok(())
    }

    /// Decode one symbol with the boundaries of `maker`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BitstreamUnderrun`] if the stream ends before the
    /// symbol is determined, [`CodecError::ZeroProbability`] if the bits
    /// select an empty interval, or a computation error for boundaries that
    /// leave the current interval
    pub fn decode(&mut self, maker: &mut DistributionMaker) -> Result<u32> {
        if maker.symbols() == 0 {
            return Err(computation_error(
                "arithmetic decoding",
                &"distribution without symbols",
            ));
        }
        self.bind(maker);
        self.queue.rewind();

        let mut min = 0;
        let mut max = maker.points() - 2;
        let mut low_bound = 0_u32;
        let mut high_bound = RANGE_MAX;
        let mut length = RANGE_MAX / 2;
        let mut pending = self.zoom;
        while min != max {
            if length == 0 {
                return Err(computation_error(
                    "arithmetic decoding",
                    &format!("interval of symbols {min}..={max} cannot be split further"),
                ));
            }
            if self.queue.read()? {
                low_bound += length;
                min = partition_point(min + 1, max + 1, |e| {
                    maker.element(e).range_value() <= low_bound
                }) - 1;
            } else {
                high_bound -= length;
                max = partition_point(min + 1, max + 1, |e| {
                    maker.element(e).range_value() < high_bound
                }) - 1;
            }
            for _ in 0..pending {
                self.queue.read()?;
            }
            pending = 0;
            length >>= 1;
        }

        let (low, high) = self.interval(min, maker, "arithmetic decoding")?;
        self.low = low;
        self.high = high;
        self.renormalize(|coder, _| {
            coder.queue.pop_many(coder.zoom + 1);
            coder.zoom = 0;
        });
        Ok(min)
    }

    /// Flush the bits that disambiguate the final interval
    pub fn finalize(&mut self) {
        let bit = self.low >= RANGE_MAX - self.high;
        self.queue.push(bit);
        self.queue.push_repeated(!bit, self.zoom + 1);
        self.low = 0;
        self.high = RANGE_MAX;
        self.zoom = 0;
    }

    /// Ideal code length of `symbol` in bits
    pub fn costs(symbol: u32, maker: &DistributionMaker) -> f64 {
        -maker.probability(symbol).log2()
    }
}
