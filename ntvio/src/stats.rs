// SPDX-License-Identifier: MIT

use alloc::rc::Rc;
use core::cell::Cell;

use crate::{DeviceIO, DeviceIOResult};

/// Simple counters, no_std friendly.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct IoStats {
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub flushes: u64,

    // Largest single transfer, to diagnose granularity
    pub max_read: u64,
    pub max_write: u64,
}

impl IoStats {
    #[inline] pub fn reset(&mut self) { *self = IoStats::default(); }
}

/// Shared read-only view of the counters of an `IOCounter`.
///
/// Survives moving the counter into an owner such as a mounted volume.
#[derive(Clone, Debug, Default)]
pub struct IoStatsHandle(Rc<Cell<IoStats>>);

impl IoStatsHandle {
    #[inline] pub fn snapshot(&self) -> IoStats { self.0.get() }
    #[inline] pub fn reset(&self) { self.0.set(IoStats::default()); }
}

/// Transparent instrumentation wrapper.
pub struct IOCounter<IO: DeviceIO> {
    inner: IO,
    stats: IoStatsHandle,
}

impl<IO: DeviceIO> IOCounter<IO> {
    #[inline]
    pub fn new(inner: IO) -> Self {
        Self { inner, stats: IoStatsHandle::default() }
    }

    /// Handle observing the counters of this wrapper.
    #[inline] pub fn handle(&self) -> IoStatsHandle { self.stats.clone() }
    #[inline] pub fn snapshot(&self) -> IoStats { self.stats.snapshot() }
    #[inline] pub fn into_inner(self) -> IO { self.inner }

    #[inline]
    fn update(&self, f: impl FnOnce(&mut IoStats)) {
        let mut s = self.stats.0.get();
        f(&mut s);
        self.stats.0.set(s);
    }
}

impl<IO: DeviceIO> DeviceIO for IOCounter<IO> {
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult {
        let len = data.len() as u64;
        self.update(|s| {
            s.writes += 1;
            s.write_bytes += len;
            s.max_write = s.max_write.max(len);
        });
        self.inner.write_at(offset, data)
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult {
        let len = buf.len() as u64;
        self.update(|s| {
            s.reads += 1;
            s.read_bytes += len;
            s.max_read = s.max_read.max(len);
        });
        self.inner.read_at(offset, buf)
    }

    #[inline]
    fn flush(&mut self) -> DeviceIOResult {
        self.update(|s| s.flushes += 1);
        self.inner.flush()
    }

    #[inline] fn size(&self) -> u64 { self.inner.size() }
    #[inline] fn set_offset(&mut self, p: u64) -> u64 { self.inner.set_offset(p) }
    #[inline] fn partition_offset(&self) -> u64 { self.inner.partition_offset() }
    #[inline] fn is_read_only(&self) -> bool { self.inner.is_read_only() }
    #[inline] fn has_pending_writes(&self) -> bool { self.inner.has_pending_writes() }
}
