// SPDX-License-Identifier: MIT
#![allow(dead_code)]

use std::{cell::Cell, rc::Rc};

use ntvfs::*;

pub const CLUSTER: u64 = 4096;

/// Formats a fresh in-memory image.
pub fn image(params: &FormatParams) -> MemDeviceIO {
    let layout = params.layout().expect("layout failed");
    let mut mem = MemDeviceIO::new(params.size as usize);
    NtfsFormatter::new(&mut mem, &layout)
        .format(false)
        .expect("format failed");
    mem
}

/// 1000 clusters of 4 KiB, 80 records, `$MFT` at cluster 102.
pub fn default_params() -> FormatParams {
    FormatParams::with_clusters(1000).with_label("TESTVOL")
}

pub fn default_image() -> MemDeviceIO {
    image(&default_params())
}

/// Mounts a clone sharing `mem`'s storage.
pub fn mount_mem(mem: &MemDeviceIO, opts: MountOptions) -> NtfsResult<Volume> {
    device_mount_with(Box::new(mem.clone()), opts)
}

pub fn mount_default(mem: &MemDeviceIO) -> Volume {
    mount_mem(mem, MountOptions::default()).expect("mount failed")
}

/// Knobs shared between a test and a mounted [`FaultyDevice`].
#[derive(Debug, Default)]
pub struct Faults {
    /// Writes overlapping `[start, end)` fail.
    pub fail_range: Cell<Option<(u64, u64)>>,
    pub fail_flush: Cell<bool>,
    pub pending: Cell<bool>,
}

impl Faults {
    pub fn fail_writes(&self, start: u64, len: u64) {
        self.fail_range.set(Some((start, start + len)));
    }

    pub fn heal(&self) {
        self.fail_range.set(None);
        self.fail_flush.set(false);
        self.pending.set(false);
    }
}

/// Memory device with injectable failures.
pub struct FaultyDevice {
    inner: MemDeviceIO,
    faults: Rc<Faults>,
}

impl FaultyDevice {
    pub fn new(inner: MemDeviceIO) -> (Self, Rc<Faults>) {
        let faults = Rc::new(Faults::default());
        (Self { inner, faults: faults.clone() }, faults)
    }
}

impl DeviceIO for FaultyDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> DeviceIOResult {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> DeviceIOResult {
        if let Some((start, end)) = self.faults.fail_range.get() {
            if offset < end && offset + data.len() as u64 > start {
                return Err(DeviceIOError::Other("injected write failure"));
            }
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> DeviceIOResult {
        if self.faults.fail_flush.get() {
            return Err(DeviceIOError::Other("injected flush failure"));
        }
        self.inner.flush()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        self.inner.set_offset(partition_offset)
    }

    fn partition_offset(&self) -> u64 {
        self.inner.partition_offset()
    }

    fn has_pending_writes(&self) -> bool {
        self.faults.pending.get()
    }
}

/// Mounts `mem` behind a [`FaultyDevice`].
pub fn mount_faulty(mem: &MemDeviceIO, opts: MountOptions) -> (Volume, Rc<Faults>) {
    let (dev, faults) = FaultyDevice::new(mem.clone());
    let vol = device_mount_with(Box::new(dev), opts).expect("mount failed");
    (vol, faults)
}
