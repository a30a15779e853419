//! Bit queue shared by the entropy back ends
//!
//! Bits are appended at the back while encoding. While decoding, a reader
//! cursor peeks ahead of the front and [`BitQueue::pop`] discards bits that
//! are fully consumed. Discarded bits are released in blocks, so a decoder
//! holds only the unread tail of the stream. Bytes are laid out most
//! significant bit first.

use crate::io::error::{CodecError, Result};
use bitvec::prelude::*;

/// Discarded bits kept before the storage is compacted
const RECYCLE_BITS: usize = 1 << 15;

/// Append-only bit sequence with a front cursor and a look-ahead reader
///
/// Cursors are absolute stream positions; `released` bits before the
/// stored ones have already been dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitQueue {
    bits: BitVec<u8, Msb0>,
    released: usize,
    front: usize,
    reader: usize,
}

impl BitQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue over the bits of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: BitVec::from_slice(bytes),
            ..Self::default()
        }
    }

    /// Append a bit
    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Append `count` copies of `bit`
    pub fn push_repeated(&mut self, bit: bool, count: usize) {
        self.bits.resize(self.bits.len() + count, bit);
    }

    /// Move the reader back to the front
    pub const fn rewind(&mut self) {
        self.reader = self.front;
    }

    /// Read the bit under the reader and advance it
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BitstreamUnderrun`] past the last bit
    pub fn read(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.reader - self.released)
            .map(|bit| *bit)
            .ok_or(CodecError::BitstreamUnderrun {
                consumed: self.reader,
                position: None,
            })?;
        self.reader += 1;
        Ok(bit)
    }

    /// Discard the front bit
    pub fn pop(&mut self) {
        self.pop_many(1);
    }

    /// Discard `count` front bits
    pub fn pop_many(&mut self, count: usize) {
        self.front = (self.front + count).min(self.len());
        self.reader = self.reader.max(self.front);
        self.recycle();
    }

    /// Discard every bit the reader has passed
    pub fn commit(&mut self) {
        self.front = self.reader;
        self.recycle();
    }

    fn recycle(&mut self) {
        let discarded = self.front - self.released;
        if discarded >= RECYCLE_BITS && discarded * 2 >= self.bits.len() {
            self.bits.drain(..discarded);
            self.released = self.front;
        }
    }

    /// Total bits written or loaded, including released ones
    pub fn len(&self) -> usize {
        self.released + self.bits.len()
    }

    /// Whether no bit was written or loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bits consumed so far by the reader
    pub const fn consumed(&self) -> usize {
        self.reader
    }

    /// Bits still held in memory
    pub fn stored(&self) -> usize {
        self.bits.len()
    }

    /// Bits from the front on, packed into bytes with the last one padded
    /// with zeros
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self
            .bits
            .get(self.front - self.released..)
            .map(BitSlice::to_bitvec)
            .unwrap_or_default();
        bits.force_align();
        bits.set_uninitialized(false);
        bits.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_are_msb_first_and_zero_padded() {
        let mut queue = BitQueue::new();
        for bit in [true, false, true, true, false, false, false, false, true, true] {
            queue.push(bit);
        }
        assert_eq!(queue.to_bytes(), vec![0b1011_0000, 0b1100_0000]);
    }

    #[test]
    fn test_reader_peeks_ahead_of_front() -> Result<()> {
        let mut queue = BitQueue::from_bytes(&[0b0100_0000]);
        assert!(!queue.read()?);
        assert!(queue.read()?);
        queue.pop();
        queue.rewind();
        assert!(queue.read()?);
        Ok(())
    }

    #[test]
    fn test_underrun_is_reported() {
        let mut queue = BitQueue::new();
        queue.push_repeated(true, 3);
        for _ in 0..3 {
            assert!(queue.read().is_ok());
        }
        assert!(matches!(
            queue.read(),
            Err(CodecError::BitstreamUnderrun { consumed: 3, .. })
        ));
    }

    #[test]
    fn test_consumed_bits_are_released() -> Result<()> {
        let bytes: Vec<u8> = (0..=255_u8).cycle().take(RECYCLE_BITS / 2).collect();
        let mut queue = BitQueue::from_bytes(&bytes);
        let total = queue.len();

        let mut decoded = Vec::with_capacity(bytes.len());
        for _ in 0..bytes.len() {
            let mut byte = 0_u8;
            for _ in 0..8 {
                byte = (byte << 1) | u8::from(queue.read()?);
            }
            decoded.push(byte);
            queue.commit();
        }

        assert_eq!(decoded, bytes);
        assert_eq!(queue.len(), total);
        assert_eq!(queue.consumed(), total);
        assert!(queue.stored() < total);
        assert!(matches!(
            queue.read(),
            Err(CodecError::BitstreamUnderrun { consumed, .. }) if consumed == total
        ));
        Ok(())
    }

    #[test]
    fn test_rewind_survives_release() -> Result<()> {
        let mut queue = BitQueue::new();
        queue.push_repeated(false, RECYCLE_BITS);
        queue.push(true);
        queue.pop_many(RECYCLE_BITS);
        assert_eq!(queue.stored(), 1);
        assert!(queue.read()?);
        queue.rewind();
        assert!(queue.read()?);
        assert_eq!(queue.to_bytes(), vec![0b1000_0000]);
        Ok(())
    }
}
