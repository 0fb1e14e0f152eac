// SPDX-License-Identifier: MIT

//! Bit operations over byte slices used as NTFS bitmaps
//! ($Bitmap for clusters, the $MFT `$BITMAP` attribute for record slots).

/// Extension trait for bitmap operations on byte slices.
///
/// Bit order matches NTFS: bit 0 is the LSB of byte 0, bit 8 the LSB of
/// byte 1, and so on. Ranges are half-open `[start, end)` and are clipped
/// to the bitmap length.
pub trait BitmapOps {
    /// Sets or clears a bit. Does nothing if `bit` is out of bounds.
    fn set_bit(&mut self, bit: usize, value: bool);

    /// Returns `false` if `bit` is out of bounds.
    fn get_bit(&self, bit: usize) -> bool;

    /// Sets or clears every bit in `[start, end)`.
    fn set_range(&mut self, start: usize, end: usize, value: bool);

    /// Counts the set bits in `[start, end)`.
    fn count_ones_in_range(&self, start: usize, end: usize) -> usize;

    /// Finds the first zero bit in `[start, end)`.
    fn find_first_zero_in(&self, start: usize, end: usize) -> Option<usize>;

    /// Length of the run of zero bits starting at `start`, stopping at `end`.
    fn zero_run_len(&self, start: usize, end: usize) -> usize;

    /// `true` if every bit in `[start, end)` is set.
    fn all_set(&self, start: usize, end: usize) -> bool;

    /// Number of addressable bits.
    fn bit_len(&self) -> usize;
}

impl BitmapOps for [u8] {
    #[inline]
    fn set_bit(&mut self, bit: usize, value: bool) {
        if let Some(byte) = self.get_mut(bit / 8) {
            let mask = 1u8 << (bit % 8);
            if value {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }

    #[inline]
    fn get_bit(&self, bit: usize) -> bool {
        self.get(bit / 8)
            .is_some_and(|b| (b & (1 << (bit % 8))) != 0)
    }

    fn set_range(&mut self, start: usize, end: usize, value: bool) {
        let end = end.min(self.bit_len());
        let mut bit = start;
        while bit < end {
            // Whole bytes in one step
            if bit % 8 == 0 && bit + 8 <= end {
                self[bit / 8] = if value { 0xFF } else { 0x00 };
                bit += 8;
                continue;
            }
            self.set_bit(bit, value);
            bit += 1;
        }
    }

    fn count_ones_in_range(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.bit_len());
        let mut count = 0;
        let mut bit = start;
        while bit < end {
            if bit % 8 == 0 && bit + 8 <= end {
                count += self[bit / 8].count_ones() as usize;
                bit += 8;
                continue;
            }
            if self.get_bit(bit) {
                count += 1;
            }
            bit += 1;
        }
        count
    }

    fn find_first_zero_in(&self, start: usize, end: usize) -> Option<usize> {
        let end = end.min(self.bit_len());
        let mut bit = start;
        while bit < end {
            // Skip full bytes
            if bit % 8 == 0 && self[bit / 8] == 0xFF {
                bit += 8;
                continue;
            }
            if !self.get_bit(bit) {
                return Some(bit);
            }
            bit += 1;
        }
        None
    }

    fn zero_run_len(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.bit_len());
        let mut bit = start;
        while bit < end {
            if bit % 8 == 0 && bit + 8 <= end && self[bit / 8] == 0x00 {
                bit += 8;
                continue;
            }
            if self.get_bit(bit) {
                break;
            }
            bit += 1;
        }
        bit.saturating_sub(start)
    }

    fn all_set(&self, start: usize, end: usize) -> bool {
        end <= self.bit_len() && self.count_ones_in_range(start, end) == end.saturating_sub(start)
    }

    #[inline]
    fn bit_len(&self) -> usize {
        self.len() * 8
    }
}
