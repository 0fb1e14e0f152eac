// SPDX-License-Identifier: MIT

use alloc::{vec, vec::Vec};

use ntvio::{DeviceIO, DeviceIOExt};

use crate::common::errors::*;
use crate::ntfs::{
    inode::{AttrSizes, MftRecord},
    runlist::Runlist,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Resident(Vec<u8>),
    NonResident { runlist: Runlist, sizes: AttrSizes },
}

/// Byte-addressable view of one attribute value.
///
/// Holds the owning record number and attribute type instead of a pointer
/// to the record; the volume resolves those when the record must change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrStream {
    pub mft_no: u64,
    pub attr_type: u32,
    cluster_size: u64,
    value: Value,
}

impl AttrStream {
    /// Opens the unnamed `attr_type` attribute of `rec` on a volume of
    /// `nr_clusters`. Runs mapped past the end of the volume are refused.
    pub fn open(rec: &MftRecord, attr_type: u32, cluster_size: u32, nr_clusters: u64) -> FormatResult<Self> {
        let attr = rec.require(attr_type)?;
        let value = if attr.non_resident {
            let nr = rec.non_resident(&attr)?;
            ensure!(nr.lowest_vcn == 0, FormatError::AttributeListUnsupported(rec.number()));
            let lcn_end = nr.runlist.lcn_end();
            ensure!(
                lcn_end <= nr_clusters,
                FormatError::RunPastVolume { record: rec.number(), lcn_end }
            );
            let mapped = nr.runlist.vcn_len().checked_mul(cluster_size as u64);
            ensure!(
                nr.sizes.data <= nr.sizes.allocated
                    && nr.sizes.initialized <= nr.sizes.data
                    && mapped.is_some_and(|m| nr.sizes.allocated <= m),
                FormatError::CorruptRecord(rec.number())
            );
            Value::NonResident { runlist: nr.runlist, sizes: nr.sizes }
        } else {
            Value::Resident(rec.resident_value(&attr)?.to_vec())
        };
        Ok(Self {
            mft_no: rec.number(),
            attr_type,
            cluster_size: cluster_size as u64,
            value,
        })
    }

    /// Non-resident stream over `runlist`; used before record 0 can be read
    /// through `$MFT` itself.
    pub fn from_runlist(mft_no: u64, attr_type: u32, cluster_size: u32, runlist: Runlist, sizes: AttrSizes) -> Self {
        Self {
            mft_no,
            attr_type,
            cluster_size: cluster_size as u64,
            value: Value::NonResident { runlist, sizes },
        }
    }

    /// Value length in bytes.
    pub fn len(&self) -> u64 {
        match &self.value {
            Value::Resident(v) => v.len() as u64,
            Value::NonResident { sizes, .. } => sizes.data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.value, Value::Resident(_))
    }

    pub fn runlist(&self) -> Option<&Runlist> {
        match &self.value {
            Value::NonResident { runlist, .. } => Some(runlist),
            Value::Resident(_) => None,
        }
    }

    pub fn sizes(&self) -> AttrSizes {
        match &self.value {
            Value::Resident(v) => AttrSizes::filled(v.len() as u64, v.len() as u64),
            Value::NonResident { sizes, .. } => *sizes,
        }
    }

    /// Byte offset on the device backing `pos`, with the contiguous byte count
    /// from there. `None` for sparse ranges and resident values.
    fn map(&self, pos: u64) -> FormatResult<Option<(u64, u64)>> {
        let Value::NonResident { runlist, .. } = &self.value else {
            return Ok(None);
        };
        let vcn = pos / self.cluster_size;
        let within = pos % self.cluster_size;
        let (lcn, clusters) = runlist.lookup(vcn).ok_or(FormatError::OutOfRange("stream offset"))?;
        let overflow = FormatError::OutOfRange("stream mapping");
        let span = clusters.checked_mul(self.cluster_size).ok_or(overflow)? - within;
        lcn.map(|lcn| {
            lcn.checked_mul(self.cluster_size)
                .and_then(|off| off.checked_add(within))
                .map(|off| (off, span))
                .ok_or(overflow)
        })
        .transpose()
    }

    fn check_range(&self, pos: u64, len: usize) -> FormatResult {
        let end = pos.checked_add(len as u64).ok_or(FormatError::OutOfRange("stream offset"))?;
        ensure!(end <= self.len(), FormatError::OutOfRange("stream offset"));
        Ok(())
    }

    /// Reads `buf.len()` bytes at `pos`. Sparse and uninitialized ranges read as zeros.
    pub fn read_at(&self, io: &mut dyn DeviceIO, pos: u64, buf: &mut [u8]) -> NtfsResult {
        self.check_range(pos, buf.len())?;
        if let Value::Resident(v) = &self.value {
            buf.copy_from_slice(&v[pos as usize..pos as usize + buf.len()]);
            return Ok(());
        }

        let initialized = self.sizes().initialized;
        let mut done = 0usize;
        while done < buf.len() {
            let cur = pos + done as u64;
            let (dev, span) = match self.map(cur)? {
                Some((dev, span)) => (Some(dev), span),
                None => (None, self.cluster_size - cur % self.cluster_size),
            };
            let n = (buf.len() - done).min(span as usize);
            let chunk = &mut buf[done..done + n];
            match dev {
                Some(dev) if cur < initialized => {
                    let valid = ((initialized - cur) as usize).min(n);
                    io.read_at(dev, &mut chunk[..valid])?;
                    chunk[valid..].fill(0);
                }
                _ => chunk.fill(0),
            }
            done += n;
        }
        Ok(())
    }

    /// Whole value.
    pub fn read_all(&self, io: &mut dyn DeviceIO) -> NtfsResult<Vec<u8>> {
        let mut buf = vec![0u8; self.len() as usize];
        self.read_at(io, 0, &mut buf)?;
        Ok(buf)
    }

    /// Writes `data` at `pos` inside the current value length.
    pub fn write_at(&self, io: &mut dyn DeviceIO, pos: u64, data: &[u8]) -> NtfsResult {
        self.for_each_extent(pos, data.len() as u64, |dev, off, n| {
            io.write_at(dev, &data[off as usize..(off + n) as usize])
        })
    }

    /// Fills `len` bytes at `pos` with `byte`.
    pub fn fill(&self, io: &mut dyn DeviceIO, pos: u64, len: u64, byte: u8) -> NtfsResult {
        self.for_each_extent(pos, len, |dev, _, n| io.fill(dev, n, byte))
    }

    fn for_each_extent(
        &self,
        pos: u64,
        len: u64,
        mut f: impl FnMut(u64, u64, u64) -> DeviceIOResult,
    ) -> NtfsResult {
        ensure!(!self.is_resident(), NtfsError::InvalidState("write to a resident value"));
        self.check_range(pos, len as usize)?;
        let mut done = 0u64;
        while done < len {
            let cur = pos + done;
            let (dev, span) = self
                .map(cur)?
                .ok_or(NtfsError::InvalidState("write to a sparse range"))?;
            let n = (len - done).min(span);
            f(dev, done, n)?;
            done += n;
        }
        Ok(())
    }

    /// Appends clusters to a non-resident value without changing its sizes.
    pub fn append_run(&mut self, lcn: u64, len: u64) -> NtfsResult {
        match &mut self.value {
            Value::NonResident { runlist, .. } => {
                runlist.push(Some(lcn), len);
                Ok(())
            }
            Value::Resident(_) => Err(NtfsError::InvalidState("resident value has no runs")),
        }
    }

    pub fn set_sizes(&mut self, new_sizes: AttrSizes) -> NtfsResult {
        match &mut self.value {
            Value::NonResident { runlist, sizes } => {
                ensure!(
                    runlist
                        .vcn_len()
                        .checked_mul(self.cluster_size)
                        .is_some_and(|m| new_sizes.allocated <= m)
                        && new_sizes.data <= new_sizes.allocated
                        && new_sizes.initialized <= new_sizes.data,
                    NtfsError::InvalidState("stream sizes exceed allocation")
                );
                *sizes = new_sizes;
                Ok(())
            }
            Value::Resident(_) => Err(NtfsError::InvalidState("resident value has no runs")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::constant::{AT_DATA, MFT_RECORD_IN_USE};
    use ntvio::prelude::*;

    fn stream() -> AttrStream {
        let mut rl = Runlist::new();
        rl.push(Some(2), 2);
        rl.push(None, 1);
        rl.push(Some(8), 1);
        AttrStream::from_runlist(5, 0x80, 512, rl, AttrSizes { allocated: 2048, data: 2000, initialized: 1900 })
    }

    #[test]
    fn test_read_crosses_runs_and_holes() {
        let mut io = MemDeviceIO::new(8 * 1024);
        io.fill(1024, 1024, 0x11).unwrap();
        io.fill(4096, 512, 0x22).unwrap();

        let s = stream();
        let data = s.read_all(&mut io).unwrap();
        assert_eq!(data.len(), 2000);
        assert!(data[..1024].iter().all(|&b| b == 0x11));
        assert!(data[1024..1536].iter().all(|&b| b == 0));
        assert!(data[1536..1900].iter().all(|&b| b == 0x22));
        // Past initialized size
        assert!(data[1900..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_maps_to_clusters() {
        let mut io = MemDeviceIO::new(8 * 1024);
        let s = stream();
        s.write_at(&mut io, 1020, &[1, 2, 3, 4]).unwrap();
        s.write_at(&mut io, 1536, &[9, 9]).unwrap();
        let img = io.snapshot();
        assert_eq!(&img[2044..2048], &[1, 2, 3, 4]);
        assert_eq!(&img[4096..4098], &[9, 9]);
        // VCN 2 is a hole
        assert_eq!(
            s.write_at(&mut io, 1030, &[1]),
            Err(NtfsError::InvalidState("write to a sparse range"))
        );
        assert_eq!(
            s.write_at(&mut io, 1999, &[1, 2]),
            Err(NtfsError::Format(FormatError::OutOfRange("stream offset")))
        );
    }

    #[test]
    fn test_open_refuses_runs_past_volume() {
        let mut rec = MftRecord::new(6, 1024, 6, MFT_RECORD_IN_USE);
        let mut rl = Runlist::new();
        rl.push(Some(90), 20);
        rec.add_non_resident(AT_DATA, &rl, AttrSizes::filled(20 * 512, 128)).unwrap();

        assert!(AttrStream::open(&rec, AT_DATA, 512, 110).is_ok());
        assert_eq!(
            AttrStream::open(&rec, AT_DATA, 512, 100),
            Err(FormatError::RunPastVolume { record: 6, lcn_end: 110 })
        );
    }

    #[test]
    fn test_map_overflow_is_an_error() {
        let mut rl = Runlist::new();
        rl.push(Some(u64::MAX / 512), 1);
        let s = AttrStream::from_runlist(5, 0x80, 1024, rl, AttrSizes::filled(1024, 1024));
        let mut io = MemDeviceIO::new(4096);
        let mut buf = [0u8; 16];
        assert_eq!(
            s.read_at(&mut io, 0, &mut buf),
            Err(NtfsError::Format(FormatError::OutOfRange("stream mapping")))
        );
    }

    #[test]
    fn test_fill_and_grow() {
        let mut io = MemDeviceIO::new(8 * 1024);
        let mut s = stream();
        s.append_run(9, 1).unwrap();
        s.set_sizes(AttrSizes::filled(2560, 2560)).unwrap();
        s.fill(&mut io, 2048, 512, 0xFF).unwrap();
        assert!(io.snapshot()[4608..5120].iter().all(|&b| b == 0xFF));
        assert!(s.set_sizes(AttrSizes::filled(4096, 4096)).is_err());
    }
}
