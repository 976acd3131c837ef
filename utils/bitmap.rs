//! Simple bitmap implementation
//!
//! Backs the dirty page bitmap handed out by the dirty tracking code.

use alloc::vec;
use alloc::vec::Vec;

/// Bitmap structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    /// Bitmap data
    data: Vec<u64>,
    /// Number of bits
    bits: usize,
}

impl Bitmap {
    /// Create a cleared bitmap holding `bits` bits
    pub fn new(bits: usize) -> Self {
        let words = (bits + 63) / 64;
        Self {
            data: vec![0; words],
            bits,
        }
    }

    /// Number of bits tracked
    pub fn len(&self) -> usize {
        self.bits
    }

    /// True when the bitmap tracks no bits at all
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Set `count` bits starting at `start`, clipped to the bitmap
    pub fn set_range(&mut self, start: usize, count: usize) {
        let end = start.saturating_add(count).min(self.bits);
        let mut bit = start;
        while bit < end {
            let word = bit / 64;
            let offset = bit % 64;
            let span = (64 - offset).min(end - bit);
            let mask = if span == 64 {
                u64::MAX
            } else {
                ((1u64 << span) - 1) << offset
            };
            self.data[word] |= mask;
            bit += span;
        }
    }

    /// Test a bit
    pub fn test(&self, bit: usize) -> bool {
        bit < self.bits && self.data[bit / 64] & (1 << (bit % 64)) != 0
    }

    /// Clear every bit
    pub fn clear_all(&mut self) {
        self.data.iter_mut().for_each(|w| *w = 0);
    }

    /// Count the set bits
    pub fn count_ones(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate the indices of set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(move |&bit| self.test(bit))
    }
}
