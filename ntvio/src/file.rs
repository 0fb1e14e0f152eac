// SPDX-License-Identifier: MIT

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{DeviceIO, DeviceIOError, DeviceIOResult};

/// `DeviceIO` over an image file or a raw block device node.
#[derive(Debug)]
pub struct FileDeviceIO {
    file: File,
    partition_offset: u64,
    len: u64,
    read_only: bool,
    dirty: bool,
}

impl FileDeviceIO {
    /// Opens `path`; `read_only` opens without write access.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> DeviceIOResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path.as_ref())?;
        // Block devices report a zero metadata length; seeking to the end works for both.
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            partition_offset: 0,
            len,
            read_only,
            dirty: false,
        })
    }

    /// Wraps an already opened file.
    pub fn from_file(mut file: File, read_only: bool) -> DeviceIOResult<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            partition_offset: 0,
            len,
            read_only,
            dirty: false,
        })
    }

    #[inline]
    fn check_bounds(&self, offset: u64, len: usize) -> DeviceIOResult {
        let end = self
            .partition_offset
            .checked_add(offset)
            .and_then(|o| o.checked_add(len as u64))
            .ok_or(DeviceIOError::OutOfBounds)?;
        if end > self.len {
            return Err(DeviceIOError::OutOfBounds);
        }
        Ok(())
    }
}

impl DeviceIO for FileDeviceIO {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult {
        self.check_bounds(offset, buf.len())?;
        self.file
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult {
        if self.read_only {
            return Err(DeviceIOError::ReadOnly);
        }
        self.check_bounds(offset, data.len())?;
        self.file
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.file.write_all(data)?;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> DeviceIOResult {
        if self.dirty {
            self.file.flush()?;
            self.file.sync_data()?;
            self.dirty = false;
        }
        Ok(())
    }

    #[inline]
    fn size(&self) -> u64 {
        self.len.saturating_sub(self.partition_offset)
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

    #[inline]
    fn has_pending_writes(&self) -> bool {
        self.dirty
    }
}
