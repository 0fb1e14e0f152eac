// SPDX-License-Identifier: MIT

use alloc::{rc::Rc, vec, vec::Vec};
use core::cell::RefCell;

use crate::{DeviceIO, DeviceIOError, DeviceIOResult};

/// In-memory implementation of `DeviceIO`.
///
/// Clones share the same storage, so a test can keep a handle to an image
/// while the volume owns another one.
#[derive(Debug, Clone)]
pub struct MemDeviceIO {
    buffer: Rc<RefCell<Vec<u8>>>,
    partition_offset: u64,
    read_only: bool,
}

impl MemDeviceIO {
    /// Zero-filled device of `len` bytes.
    #[inline]
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    #[inline]
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self {
            buffer: Rc::new(RefCell::new(buffer)),
            partition_offset: 0,
            read_only: false,
        }
    }

    /// Same storage, but refusing writes.
    #[inline]
    pub fn read_only(&self) -> Self {
        Self {
            buffer: Rc::clone(&self.buffer),
            partition_offset: self.partition_offset,
            read_only: true,
        }
    }

    /// Copies the current contents of the whole backing buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.borrow().clone()
    }

    /// Runs `f` on the raw backing buffer (partition offset ignored).
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.buffer.borrow_mut())
    }

    #[inline]
    fn check_bounds(&self, abs_off: u64, len: usize) -> DeviceIOResult {
        let end = abs_off
            .checked_add(len as u64)
            .ok_or(DeviceIOError::OutOfBounds)?;
        if end > self.buffer.borrow().len() as u64 {
            return Err(DeviceIOError::OutOfBounds);
        }
        Ok(())
    }
}

impl DeviceIO for MemDeviceIO {
    #[inline(always)]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult {
        let abs_offset = self.partition_offset + offset;
        self.check_bounds(abs_offset, buf.len())?;
        let start = abs_offset as usize;
        buf.copy_from_slice(&self.buffer.borrow()[start..start + buf.len()]);
        Ok(())
    }

    #[inline(always)]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult {
        if self.read_only {
            return Err(DeviceIOError::ReadOnly);
        }
        let abs_offset = self.partition_offset + offset;
        self.check_bounds(abs_offset, data.len())?;
        let start = abs_offset as usize;
        self.buffer.borrow_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> DeviceIOResult {
        Ok(())
    }

    #[inline]
    fn size(&self) -> u64 {
        (self.buffer.borrow().len() as u64).saturating_sub(self.partition_offset)
    }

    #[inline]
    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        self.partition_offset = partition_offset;
        partition_offset
    }

    #[inline]
    fn partition_offset(&self) -> u64 {
        self.partition_offset
    }

    #[inline]
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
