// SPDX-License-Identifier: MIT

use alloc::vec::Vec;

use log::warn;
use ntvio::DeviceIO;

use crate::common::{bitmap::BitmapOps, errors::*};
use crate::ntfs::{inode::AttrSizes, stream::AttrStream};

/// A bitmap attribute held in memory and written through to its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapStream {
    stream: AttrStream,
    bits: Vec<u8>,
}

impl BitmapStream {
    pub fn load(io: &mut dyn DeviceIO, stream: AttrStream) -> NtfsResult<Self> {
        let bits = stream.read_all(io)?;
        Ok(Self { stream, bits })
    }

    #[inline] pub fn bit_len(&self) -> u64 { self.bits.bit_len() as u64 }
    #[inline] pub fn get(&self, bit: u64) -> bool { self.bits.get_bit(bit as usize) }
    #[inline] pub fn as_bytes(&self) -> &[u8] { &self.bits }
    #[inline] pub fn stream(&self) -> &AttrStream { &self.stream }

    #[inline]
    pub fn count_ones(&self, start: u64, end: u64) -> u64 {
        self.bits.count_ones_in_range(start as usize, end as usize) as u64
    }

    #[inline]
    pub fn find_zero(&self, start: u64, end: u64) -> Option<u64> {
        self.bits
            .find_first_zero_in(start as usize, end as usize)
            .map(|b| b as u64)
    }

    #[inline]
    pub fn zero_run(&self, start: u64, end: u64) -> u64 {
        self.bits.zero_run_len(start as usize, end as usize) as u64
    }

    #[inline]
    pub fn all_set(&self, start: u64, end: u64) -> bool {
        self.bits.all_set(start as usize, end as usize)
    }

    /// Sets or clears each `(start, len)` range and writes the touched bytes
    /// through. If a write fails, the in-memory bits are restored and the
    /// ranges already written are rewritten from the restored copy.
    pub fn update(&mut self, io: &mut dyn DeviceIO, ranges: &[(u64, u64)], value: bool) -> NtfsResult {
        let saved = self.bits.clone();
        for &(start, len) in ranges {
            self.bits.set_range(start as usize, (start + len) as usize, value);
        }

        for (i, &(start, len)) in ranges.iter().enumerate() {
            if let Err(e) = self.write_through(io, start, len) {
                self.bits = saved;
                for &(s, l) in &ranges[..i] {
                    if let Err(e2) = self.write_through(io, s, l) {
                        warn!("bitmap rollback write at bit {s} failed: {e2}");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_through(&self, io: &mut dyn DeviceIO, start: u64, len: u64) -> NtfsResult {
        if len == 0 {
            return Ok(());
        }
        let first = (start / 8) as usize;
        let last = ((start + len - 1) / 8) as usize;
        self.stream.write_at(io, first as u64, &self.bits[first..=last])
    }

    /// Adds `extra_bytes` zero bytes at the end in memory and records the
    /// new stream geometry. The caller writes the new bytes out.
    pub fn grow(&mut self, extra_bytes: usize, new_run: Option<(u64, u64)>, sizes: AttrSizes) -> NtfsResult {
        if let Some((lcn, len)) = new_run {
            self.stream.append_run(lcn, len)?;
        }
        self.stream.set_sizes(sizes)?;
        self.bits.resize(self.bits.len() + extra_bytes, 0);
        Ok(())
    }

    /// Writes the bytes in `[from, len)` through to disk.
    pub fn write_tail(&self, io: &mut dyn DeviceIO, from: usize) -> NtfsResult {
        if from >= self.bits.len() {
            return Ok(());
        }
        self.stream.write_at(io, from as u64, &self.bits[from..])
    }
}
