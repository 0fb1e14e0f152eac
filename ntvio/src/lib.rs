// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Core modules
pub mod errors;
#[macro_use]
mod macros;
#[cfg(feature = "alloc")]
pub mod stats;

// Backend modules
#[cfg(feature = "alloc")]
mod mem;

#[cfg(feature = "std")]
mod file;

// Prelude re-exports (central entrypoint)
pub mod prelude {
    pub use super::DeviceIO;
    pub use super::DeviceIOExt;
    pub use super::DeviceIOStructExt;
    pub use super::errors::*;

    #[cfg(feature = "alloc")]
    pub use super::stats::*;

    #[cfg(feature = "alloc")]
    pub use super::mem::MemDeviceIO;

    #[cfg(feature = "std")]
    pub use super::file::FileDeviceIO;
}

use errors::*;

/// Size of the stack scratch buffer used by fill and struct helpers.
/// 4 KiB matches the common page, sector-group and cluster size.
pub const BLOCK_BUF_SIZE: usize = 4096;

/// Block device abstraction consumed by the volume core.
///
/// Offsets are byte offsets relative to the partition start. Implementations
/// may target RAM, image files or raw block devices. Calls are blocking and
/// retry policy, if any, belongs to the implementation.
pub trait DeviceIO {
    /// Reads `buf.len()` bytes into `buf` from `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult;

    /// Writes `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult;

    /// Pushes buffered writes down to the backing store.
    fn flush(&mut self) -> DeviceIOResult;

    /// Size in bytes visible through this device (after the partition offset).
    fn size(&self) -> u64;

    fn set_offset(&mut self, partition_offset: u64) -> u64;
    fn partition_offset(&self) -> u64;

    /// `true` when the device was opened without write access.
    fn is_read_only(&self) -> bool {
        false
    }

    /// `true` while writes are buffered and not yet flushed.
    fn has_pending_writes(&self) -> bool {
        false
    }

    /// Releases the device. The default flushes.
    fn close(&mut self) -> DeviceIOResult {
        self.flush()
    }
}

#[cfg(feature = "alloc")]
impl<T: DeviceIO + ?Sized> DeviceIO for alloc::boxed::Box<T> {
    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult {
        (**self).read_at(offset, buf)
    }
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult {
        (**self).write_at(offset, data)
    }
    #[inline]
    fn flush(&mut self) -> DeviceIOResult {
        (**self).flush()
    }
    #[inline]
    fn size(&self) -> u64 {
        (**self).size()
    }
    #[inline]
    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        (**self).set_offset(partition_offset)
    }
    #[inline]
    fn partition_offset(&self) -> u64 {
        (**self).partition_offset()
    }
    #[inline]
    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }
    #[inline]
    fn has_pending_writes(&self) -> bool {
        (**self).has_pending_writes()
    }
    #[inline]
    fn close(&mut self) -> DeviceIOResult {
        (**self).close()
    }
}

/// Extension helpers for `DeviceIO`:
/// - fills (zero or pattern)
/// - little-endian primitive read/write (`read_u16_at`, `write_u64_at`, ...)
pub trait DeviceIOExt: DeviceIO {
    /// Fills `len` bytes at `offset` with `byte`.
    #[inline]
    fn fill(&mut self, offset: u64, len: u64, byte: u8) -> DeviceIOResult {
        let chunk_buf = [byte; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(BLOCK_BUF_SIZE as u64) as usize;
            self.write_at(off, &chunk_buf[..chunk])?;
            off += chunk as u64;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Fills a region with zeroes.
    #[inline]
    fn zero_fill(&mut self, offset: u64, len: u64) -> DeviceIOResult {
        self.fill(offset, len, 0)
    }

    deviceio_impl_primitive_rw!(u8, u16, u32, u64);
}

impl<T: DeviceIO + ?Sized> DeviceIOExt for T {}

/// Reads and writes fixed-layout structs through zerocopy.
pub trait DeviceIOStructExt: DeviceIO {
    /// Reads a struct of type `T` from the given offset.
    fn read_struct<T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
    ) -> DeviceIOResult<T> {
        let size = core::mem::size_of::<T>();
        if size > BLOCK_BUF_SIZE {
            return Err(DeviceIOError::Unsupported);
        }
        let mut buf = [0u8; BLOCK_BUF_SIZE];
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| DeviceIOError::Other("read_struct failed"))
    }

    /// Writes a struct of type `T` at the given offset.
    fn write_struct<T: zerocopy::IntoBytes + zerocopy::Immutable>(
        &mut self,
        offset: u64,
        val: &T,
    ) -> DeviceIOResult {
        self.write_at(offset, val.as_bytes())
    }
}

impl<T: DeviceIO + ?Sized> DeviceIOStructExt for T {}
