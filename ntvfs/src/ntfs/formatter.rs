// SPDX-License-Identifier: MIT

//! Minimal NTFS image formatter.
//!
//! Lays out the system files in front of `$MFT`, in this order: `$Boot`,
//! `$MFTMirr`, `$LogFile`, `$Bitmap`, `$UpCase`, `$AttrDef`, the `$MFT`
//! bitmap, then `$MFT` itself. Directories get no index.

use alloc::{string::String, vec, vec::Vec};

use log::debug;
use ntvio::{DeviceIO, DeviceIOExt, DeviceIOStructExt};

use crate::common::{bitmap::BitmapOps, errors::*, formatter::FsFormatter};
use crate::ntfs::{
    attrdef::AttrDef,
    constant::*,
    inode::{AttrSizes, MftRecord},
    logfile::{JournalState, restart_page},
    runlist::Runlist,
    types::*,
    upcase::Upcase,
    utils::*,
    version::{NtfsVersion, RecordSizePolicy},
};

/// `FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM`.
const SYSTEM_FILE_ATTRIBUTES: u32 = 0x0006;
const STANDARD_INFORMATION_SIZE: usize = 48;

const SYSTEM_FILE_NAMES: [&str; 12] = [
    "$MFT", "$MFTMirr", "$LogFile", "$Volume", "$AttrDef", ".", "$Bitmap", "$Boot", "$BadClus", "$Secure",
    "$UpCase", "$Extend",
];

/// What to format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatParams {
    /// Device bytes to use; the last sector holds the backup boot sector.
    pub size: u64,
    pub sector_size: u16,
    pub cluster_size: u32,
    pub mft_record_size: u32,
    pub index_record_size: u32,
    /// Initial `$MFT` records, rounded up to whole clusters.
    pub mft_records: u64,
    pub logfile_size: u64,
    pub label: String,
    pub version: NtfsVersion,
    pub serial: u64,
    pub volume_flags: VolumeFlags,
    /// How the restart area of `$LogFile` starts out.
    pub journal: JournalState,
}

impl FormatParams {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            sector_size: NTFS_DEFAULT_SECTOR_SIZE,
            cluster_size: NTFS_DEFAULT_CLUSTER_SIZE,
            mft_record_size: NTFS_DEFAULT_MFT_RECORD_SIZE,
            index_record_size: NTFS_DEFAULT_INDEX_RECORD_SIZE,
            mft_records: NTFS_DEFAULT_MFT_RECORDS,
            logfile_size: NTFS_DEFAULT_LOGFILE_SIZE,
            label: String::new(),
            version: NtfsVersion::V3_1,
            serial: 0x4E54_5646_0000_0001,
            volume_flags: VolumeFlags::empty(),
            journal: JournalState::Empty,
        }
    }

    /// Size of a volume holding exactly `nr_clusters` clusters of the
    /// default size, plus the cluster carrying the backup boot sector.
    pub fn with_clusters(nr_clusters: u64) -> Self {
        Self::new((nr_clusters + 1) * NTFS_DEFAULT_CLUSTER_SIZE as u64)
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_sector_size(mut self, sector_size: u16) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_cluster_size(mut self, cluster_size: u32) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    pub fn with_mft_record_size(mut self, size: u32) -> Self {
        self.mft_record_size = size;
        self
    }

    pub fn with_mft_records(mut self, records: u64) -> Self {
        self.mft_records = records;
        self
    }

    pub fn with_logfile_size(mut self, size: u64) -> Self {
        self.logfile_size = size;
        self
    }

    pub fn with_version(mut self, version: NtfsVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_volume_flags(mut self, flags: VolumeFlags) -> Self {
        self.volume_flags = flags;
        self
    }

    pub fn with_journal(mut self, journal: JournalState) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Validates the parameters and places every system file.
    pub fn layout(&self) -> FormatResult<NtfsLayout> {
        NtfsLayout::new(self)
    }
}

/// Cluster extent of one system file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub lcn: u64,
    pub clusters: u64,
    /// Value size in bytes.
    pub bytes: u64,
}

/// Where everything goes on a volume described by [`FormatParams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfsLayout {
    pub params: FormatParams,
    pub number_of_sectors: u64,
    pub nr_clusters: u64,
    pub mft_records: u64,
    pub mftmirr_size: u64,
    pub boot: Extent,
    pub mftmirr: Extent,
    pub logfile: Extent,
    pub bitmap: Extent,
    pub upcase: Extent,
    pub attrdef: Extent,
    pub mft_bitmap: Extent,
    pub mft: Extent,
}

impl NtfsLayout {
    pub fn new(params: &FormatParams) -> FormatResult<Self> {
        let ss = params.sector_size as u32;
        let cs = params.cluster_size;
        let rs = params.mft_record_size;
        ensure!(
            ss.is_power_of_two() && (NTFS_MIN_SECTOR_SIZE..=NTFS_MAX_SECTOR_SIZE).contains(&ss),
            FormatError::NotPowerOfTwo { field: "sector size", value: ss as u64 }
        );
        ensure!(
            cs.is_power_of_two() && cs >= ss && cs <= NTFS_MAX_CLUSTER_SIZE,
            FormatError::NotPowerOfTwo { field: "cluster size", value: cs as u64 }
        );
        ensure!(
            rs.is_power_of_two() && rs as usize >= NTFS_BLOCK_SIZE && rs >= ss,
            FormatError::NotPowerOfTwo { field: "record size", value: rs as u64 }
        );
        ensure!(
            params.index_record_size.is_power_of_two(),
            FormatError::NotPowerOfTwo { field: "index record size", value: params.index_record_size as u64 }
        );
        ensure!(params.mft_records >= SYSTEM_RECORDS, FormatError::OutOfRange("MFT record count"));
        ensure!(params.logfile_size > 0, FormatError::OutOfRange("$LogFile size"));

        let (cs64, rs64) = (cs as u64, rs as u64);
        let spc = (cs / ss) as u64;
        let device_sectors = params.size / ss as u64;
        ensure!(device_sectors > spc, FormatError::OutOfRange("volume size"));
        let number_of_sectors = device_sectors - 1;
        let nr_clusters = number_of_sectors / spc;

        let clusters_for = |bytes: u64| bytes.div_ceil(cs64).max(1);
        let mut next = 0u64;
        let mut place = |bytes: u64| {
            let ext = Extent { lcn: next, clusters: clusters_for(bytes), bytes };
            next += ext.clusters;
            ext
        };

        let mft_bytes = (params.mft_records * rs64).next_multiple_of(cs64);
        let mft_records = mft_bytes / rs64;
        let mftmirr_size = if cs <= 4 * rs { 4 } else { cs64 / rs64 };

        let boot = place(NTFS_BOOT_REGION_SIZE);
        let mftmirr = place(mftmirr_size * rs64);
        let logfile = place(params.logfile_size.next_multiple_of(cs64));
        let bitmap = place(nr_clusters.div_ceil(8).next_multiple_of(8));
        let upcase = place(UPCASE_BYTES as u64);
        let attrdef = place(AttrDef::default_table().len() as u64);
        let mft_bitmap = place(mft_records.div_ceil(8).next_multiple_of(8));
        let mft = place(mft_bytes);
        ensure!(next <= nr_clusters, FormatError::OutOfRange("volume size"));

        Ok(Self {
            params: params.clone(),
            number_of_sectors,
            nr_clusters,
            mft_records,
            mftmirr_size,
            boot,
            mftmirr,
            logfile,
            bitmap,
            upcase,
            attrdef,
            mft_bitmap,
            mft,
        })
    }

    /// Extents marked in use in `$Bitmap`.
    pub fn system_extents(&self) -> [Extent; 8] {
        [
            self.boot,
            self.mftmirr,
            self.logfile,
            self.bitmap,
            self.upcase,
            self.attrdef,
            self.mft_bitmap,
            self.mft,
        ]
    }

    /// Clusters in use right after formatting.
    pub fn used_clusters(&self) -> u64 {
        self.system_extents().iter().map(|e| e.clusters).sum()
    }

    fn boot_sector(&self) -> FormatResult<NtfsBootSector> {
        let p = &self.params;
        let policy = RecordSizePolicy::SignedClustersOrShift;
        Ok(NtfsBootSector::new(
            p.sector_size,
            p.cluster_size,
            self.number_of_sectors,
            self.mft.lcn,
            self.mftmirr.lcn,
            policy.encode(p.mft_record_size, p.cluster_size)?,
            policy.encode(p.index_record_size, p.cluster_size)?,
            p.serial,
        ))
    }
}

/// Writes an empty NTFS volume described by an [`NtfsLayout`].
pub struct NtfsFormatter<'a, IO: DeviceIO + ?Sized> {
    io: &'a mut IO,
    layout: &'a NtfsLayout,
}

impl<'a, IO: DeviceIO + ?Sized> NtfsFormatter<'a, IO> {
    pub fn new(io: &'a mut IO, layout: &'a NtfsLayout) -> Self {
        Self { io, layout }
    }

    #[inline]
    fn offset(&self, lcn: u64) -> u64 {
        lcn * self.layout.params.cluster_size as u64
    }

    fn write_boot(&mut self) -> NtfsResult {
        let boot = self.layout.boot_sector()?;
        let ss = self.layout.params.sector_size as u64;
        let region = self.layout.boot.clusters * self.layout.params.cluster_size as u64;
        self.io.zero_fill(0, region)?;
        self.io.write_struct(0, &boot)?;
        // Backup copy in the last sector of the device
        let backup = (self.layout.params.size / ss - 1) * ss;
        self.io.write_struct(backup, &boot)?;
        Ok(())
    }

    fn write_extent(&mut self, ext: Extent, value: &[u8]) -> NtfsResult {
        let off = self.offset(ext.lcn);
        let span = ext.clusters * self.layout.params.cluster_size as u64;
        self.io.write_at(off, value)?;
        self.io.zero_fill(off + value.len() as u64, span - value.len() as u64)?;
        Ok(())
    }

    fn write_logfile(&mut self) -> NtfsResult {
        let ext = self.layout.logfile;
        let off = self.offset(ext.lcn);
        let len = ext.clusters * self.layout.params.cluster_size as u64;
        self.io.fill(off, len, 0xFF)?;
        let clean = match self.layout.params.journal {
            JournalState::Empty => return Ok(()),
            JournalState::Clean => true,
            JournalState::Dirty => false,
        };
        let page = restart_page(clean);
        for i in 0..2u64.min(len / LOGFILE_PAGE_SIZE as u64) {
            self.io.write_at(off + i * LOGFILE_PAGE_SIZE as u64, &page)?;
        }
        Ok(())
    }

    fn write_bitmaps(&mut self) -> NtfsResult {
        let l = self.layout;
        let mut bits = vec![0u8; l.bitmap.bytes as usize];
        for ext in l.system_extents() {
            bits.set_range(ext.lcn as usize, (ext.lcn + ext.clusters) as usize, true);
        }
        // Bits past the end of the volume read as allocated
        let total = bits.bit_len();
        bits.set_range(l.nr_clusters as usize, total, true);
        self.write_extent(l.bitmap, &bits)?;

        let mut mft_bits = vec![0u8; l.mft_bitmap.bytes as usize];
        // System files plus the reserved slots the allocator never hands out
        mft_bits.set_range(0, FIRST_USER_RECORD.min(l.mft_records) as usize, true);
        self.write_extent(l.mft_bitmap, &mft_bits)
    }

    fn system_record(&self, number: u64) -> NtfsResult<MftRecord> {
        let l = self.layout;
        let p = &l.params;
        let rs = p.mft_record_size as usize;
        let cs = p.cluster_size as u64;
        let is_dir = number == FILE_ROOT || number == FILE_EXTEND;
        let flags = MFT_RECORD_IN_USE | if is_dir { MFT_RECORD_IS_DIRECTORY } else { 0 };
        let mut rec = MftRecord::new(number, rs, number.max(1) as u16, flags);

        let mut si = [0u8; STANDARD_INFORMATION_SIZE];
        put_u32(&mut si, 32, SYSTEM_FILE_ATTRIBUTES);
        rec.add_resident(AT_STANDARD_INFORMATION, &si)?;

        let Some(name) = SYSTEM_FILE_NAMES.get(number as usize) else {
            return Ok(rec);
        };

        let data_ext = match number {
            FILE_MFT => Some(l.mft),
            FILE_MFTMIRR => Some(l.mftmirr),
            FILE_LOGFILE => Some(l.logfile),
            FILE_ATTRDEF => Some(l.attrdef),
            FILE_BITMAP => Some(l.bitmap),
            FILE_BOOT => Some(l.boot),
            FILE_UPCASE => Some(l.upcase),
            _ => None,
        };
        let (alloc, size) = data_ext.map_or((0, 0), |e| (e.clusters * cs, e.bytes));
        rec.add_resident(AT_FILE_NAME, &file_name_value(name, alloc, size))?;

        match number {
            FILE_VOLUME => {
                let label: Vec<u8> = p.label.encode_utf16().flat_map(u16::to_le_bytes).collect();
                rec.add_resident(AT_VOLUME_NAME, &label)?;
                let mut info = [0u8; VOLUME_INFORMATION_SIZE];
                info[VOLINFO_MAJOR] = p.version.major;
                info[VOLINFO_MINOR] = p.version.minor;
                put_u16(&mut info, VOLINFO_FLAGS, p.volume_flags.bits());
                rec.add_resident(AT_VOLUME_INFORMATION, &info)?;
            }
            FILE_BADCLUS => rec.add_resident(AT_DATA, &[])?,
            _ => {}
        }
        if let Some(ext) = data_ext {
            rec.add_non_resident(AT_DATA, &single_run(ext), AttrSizes::filled(alloc, size))?;
        }
        if number == FILE_MFT {
            let ext = l.mft_bitmap;
            rec.add_non_resident(AT_BITMAP, &single_run(ext), AttrSizes::filled(ext.clusters * cs, ext.bytes))?;
        }
        Ok(rec)
    }

    fn write_mft(&mut self) -> NtfsResult {
        let l = self.layout;
        let rs = l.params.mft_record_size as u64;
        let mft_off = self.offset(l.mft.lcn);
        let mirr_off = self.offset(l.mftmirr.lcn);
        self.io.zero_fill(mft_off, l.mft.clusters * l.params.cluster_size as u64)?;
        self.write_extent(l.mftmirr, &[])?;

        for number in 0..l.mft_records {
            let mut rec = if number < SYSTEM_RECORDS {
                self.system_record(number)?
            } else {
                MftRecord::new(number, rs as usize, 0, 0)
            };
            let raw = rec.to_disk();
            self.io.write_at(mft_off + number * rs, &raw)?;
            if number < l.mftmirr_size {
                self.io.write_at(mirr_off + number * rs, &raw)?;
            }
        }
        Ok(())
    }

    fn zero_free_clusters(&mut self) -> NtfsResult {
        let l = self.layout;
        let cs = l.params.cluster_size as u64;
        let used_end = l.mft.lcn + l.mft.clusters;
        self.io.zero_fill(used_end * cs, (l.nr_clusters - used_end) * cs)?;
        Ok(())
    }
}

impl<IO: DeviceIO + ?Sized> FsFormatter for NtfsFormatter<'_, IO> {
    fn format(&mut self, full_format: bool) -> NtfsResult {
        let l = self.layout;
        ensure!(self.io.size() >= l.params.size, DeviceIOError::OutOfBounds);
        debug!(
            "formatting {} clusters, $MFT at {} ({} records), $MFTMirr at {}",
            l.nr_clusters, l.mft.lcn, l.mft_records, l.mftmirr.lcn
        );

        self.write_boot()?;
        self.write_logfile()?;
        self.write_bitmaps()?;
        self.write_extent(l.upcase, &Upcase::default_table().to_bytes())?;
        self.write_extent(l.attrdef, &AttrDef::default_table())?;
        self.write_mft()?;
        if full_format {
            self.zero_free_clusters()?;
        }
        self.flush()
    }

    fn flush(&mut self) -> NtfsResult {
        self.io.flush()?;
        Ok(())
    }
}

fn single_run(ext: Extent) -> Runlist {
    let mut rl = Runlist::new();
    rl.push(Some(ext.lcn), ext.clusters);
    rl
}

/// `$FILE_NAME` value of a system file in the root directory.
fn file_name_value(name: &str, allocated: u64, size: u64) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut v = vec![0u8; 66 + 2 * units.len()];
    put_u64(&mut v, 0, FILE_ROOT | (FILE_ROOT << 48));
    put_u64(&mut v, 40, allocated);
    put_u64(&mut v, 48, size);
    put_u32(&mut v, 56, SYSTEM_FILE_ATTRIBUTES);
    v[64] = units.len() as u8;
    // Win32 and DOS namespace
    v[65] = 3;
    for (i, u) in units.iter().enumerate() {
        put_u16(&mut v, 66 + 2 * i, *u);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntvio::prelude::*;

    #[test]
    fn test_default_layout_places_mft_after_system_files() {
        let l = FormatParams::with_clusters(1000).layout().unwrap();
        assert_eq!(l.nr_clusters, 1000);
        assert_eq!(l.boot.clusters, 2);
        assert_eq!(l.mftmirr.lcn, 2);
        assert_eq!(l.logfile.clusters, 64);
        assert_eq!(l.upcase.clusters, 32);
        assert_eq!(l.mft.lcn, 102);
        assert_eq!(l.mft.clusters, 20);
        assert_eq!(l.mft_records, 80);
        assert_eq!(l.used_clusters(), 122);
    }

    #[test]
    fn test_layout_rejects_bad_params() {
        assert!(FormatParams::new(64 * 1024).layout().is_err());
        assert!(FormatParams::with_clusters(1000).with_cluster_size(3000).layout().is_err());
        assert!(FormatParams::with_clusters(1000).with_mft_record_size(256).layout().is_err());
        assert!(FormatParams::with_clusters(1000).with_mft_records(8).layout().is_err());
    }

    #[test]
    fn test_records_rounded_to_clusters() {
        let l = FormatParams::with_clusters(1000).with_mft_records(65).layout().unwrap();
        assert_eq!(l.mft_records, 68);
        assert_eq!(l.mft_bitmap.bytes, 16);
    }

    #[test]
    fn test_format_writes_boot_and_backup() {
        let params = FormatParams::with_clusters(1000);
        let layout = params.layout().unwrap();
        let mut io = MemDeviceIO::new(params.size as usize);
        NtfsFormatter::new(&mut io, &layout).format(false).unwrap();

        let boot: NtfsBootSector = io.read_struct(0).unwrap();
        boot.check_signature().unwrap();
        let mft_lcn = boot.mft_lcn;
        assert_eq!(mft_lcn, 102);
        assert_eq!(boot.clusters_per_mft_record, -10);
        let backup: NtfsBootSector = io.read_struct(params.size - 512).unwrap();
        assert_eq!(zerocopy::IntoBytes::as_bytes(&backup), zerocopy::IntoBytes::as_bytes(&boot));

        // Record 0 and its mirror copy are identical
        let img = io.snapshot();
        let mft = 102 * 4096;
        assert_eq!(&img[mft..mft + 4096], &img[2 * 4096..3 * 4096]);
        assert_eq!(&img[mft..mft + 4], b"FILE");
    }

    #[test]
    fn test_format_reserves_records_below_first_user_record() {
        let params = FormatParams::with_clusters(1000);
        let layout = params.layout().unwrap();
        let mut io = MemDeviceIO::new(params.size as usize);
        NtfsFormatter::new(&mut io, &layout).format(false).unwrap();

        let off = layout.mft_bitmap.lcn as usize * 4096;
        let img = io.snapshot();
        let bits = &img[off..off + layout.mft_bitmap.bytes as usize];
        assert!(bits.all_set(0, 64));
        assert_eq!(bits.count_ones_in_range(0, 80), 64);
    }

    #[test]
    fn test_format_refuses_small_device() {
        let params = FormatParams::with_clusters(1000);
        let layout = params.layout().unwrap();
        let mut io = MemDeviceIO::new(4096);
        assert_eq!(
            NtfsFormatter::new(&mut io, &layout).format(true),
            Err(NtfsError::Device(DeviceIOError::OutOfBounds))
        );
    }
}
