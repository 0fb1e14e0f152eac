// SPDX-License-Identifier: MIT

use alloc::{boxed::Box, string::String, vec, vec::Vec};
use core::{fmt, num::NonZeroUsize};

use log::{debug, warn};
use ntvio::DeviceIO;

use crate::common::errors::*;
use crate::ntfs::{
    attrdef::AttrDef,
    bitmap::BitmapStream,
    cache::DirCache,
    cluster::Zones,
    constant::*,
    inode::MftRecord,
    logfile::JournalState,
    mount::MountState,
    stream::AttrStream,
    types::*,
    upcase::Upcase,
    utils::*,
    version::{NtfsVersion, RecordSizePolicy},
};

/// Sizes and locations derived from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub sector_size: u32,
    pub sector_size_bits: u8,
    pub cluster_size: u32,
    pub cluster_size_bits: u8,
    pub mft_record_size: u32,
    pub mft_record_size_bits: u8,
    pub index_record_size: u32,
    pub index_record_size_bits: u8,
    pub nr_clusters: u64,
    pub mft_lcn: u64,
    pub mftmirr_lcn: u64,
    /// Records duplicated in `$MFTMirr`.
    pub mftmirr_size: u64,
    pub serial: u64,
}

impl Geometry {
    /// Validates `boot` and derives the volume geometry from it. The volume
    /// must fit in `device_size` bytes.
    pub fn from_boot(boot: &NtfsBootSector, device_size: u64) -> FormatResult<Self> {
        boot.check_signature()?;

        let sector_size = boot.bytes_per_sector as u32;
        ensure!(
            sector_size.is_power_of_two(),
            FormatError::NotPowerOfTwo { field: "sector size", value: sector_size as u64 }
        );
        ensure!(
            (NTFS_MIN_SECTOR_SIZE..=NTFS_MAX_SECTOR_SIZE).contains(&sector_size),
            FormatError::OutOfRange("sector size")
        );

        let spc = boot.sectors_per_cluster();
        ensure!(
            spc.is_power_of_two(),
            FormatError::NotPowerOfTwo { field: "sectors per cluster", value: spc as u64 }
        );
        let cluster_size = sector_size
            .checked_mul(spc)
            .filter(|&c| c <= NTFS_MAX_CLUSTER_SIZE)
            .ok_or(FormatError::OutOfRange("cluster size"))?;

        // Every supported version encodes record sizes the same way
        let policy = RecordSizePolicy::SignedClustersOrShift;
        let mft_record_size = policy.decode(boot.clusters_per_mft_record, cluster_size)?;
        ensure!(
            mft_record_size as usize >= NTFS_BLOCK_SIZE && mft_record_size >= sector_size,
            FormatError::OutOfRange("MFT record size")
        );
        let index_record_size = policy.decode(boot.clusters_per_index_record, cluster_size)?;

        let total_sectors = boot.number_of_sectors;
        let nr_clusters = total_sectors / spc as u64;
        ensure!(nr_clusters > 0, FormatError::OutOfRange("volume size"));
        let volume_bytes = total_sectors
            .checked_mul(sector_size as u64)
            .ok_or(FormatError::VolumeTooLarge)?;
        ensure!(volume_bytes <= device_size, FormatError::VolumeTooLarge);

        let (mft_lcn, mftmirr_lcn) = (boot.mft_lcn, boot.mftmirr_lcn);
        ensure!(mft_lcn < nr_clusters, FormatError::OutOfRange("$MFT location"));
        ensure!(mftmirr_lcn < nr_clusters, FormatError::OutOfRange("$MFTMirr location"));

        let mftmirr_size = if cluster_size <= 4 * mft_record_size {
            4
        } else {
            (cluster_size / mft_record_size) as u64
        };

        let geometry = Self {
            sector_size,
            sector_size_bits: sector_size.trailing_zeros() as u8,
            cluster_size,
            cluster_size_bits: cluster_size.trailing_zeros() as u8,
            mft_record_size,
            mft_record_size_bits: mft_record_size.trailing_zeros() as u8,
            index_record_size,
            index_record_size_bits: index_record_size.trailing_zeros() as u8,
            nr_clusters,
            mft_lcn,
            mftmirr_lcn,
            mftmirr_size,
            serial: boot.volume_serial_number,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks the relations between the fields.
    pub fn validate(&self) -> FormatResult {
        let pow2 = |field, v: u32, bits: u8| -> FormatResult {
            ensure!(
                v.is_power_of_two() && v.trailing_zeros() == bits as u32,
                FormatError::NotPowerOfTwo { field, value: v as u64 }
            );
            Ok(())
        };
        pow2("sector size", self.sector_size, self.sector_size_bits)?;
        pow2("cluster size", self.cluster_size, self.cluster_size_bits)?;
        pow2("record size", self.mft_record_size, self.mft_record_size_bits)?;
        pow2("index record size", self.index_record_size, self.index_record_size_bits)?;
        ensure!(self.cluster_size >= self.sector_size, FormatError::OutOfRange("cluster size"));
        ensure!(self.mft_lcn < self.nr_clusters, FormatError::OutOfRange("$MFT location"));
        ensure!(self.mftmirr_lcn < self.nr_clusters, FormatError::OutOfRange("$MFTMirr location"));
        ensure!(self.mftmirr_size >= 1, FormatError::OutOfRange("$MFTMirr size"));
        Ok(())
    }

    #[inline]
    pub fn cluster_offset(&self, lcn: u64) -> u64 {
        lcn << self.cluster_size_bits
    }

    #[inline]
    pub fn volume_size(&self) -> u64 {
        self.nr_clusters << self.cluster_size_bits
    }
}

/// An open NTFS volume.
///
/// Owns its device and every metadata stream it loads. Single-threaded:
/// callers serialize access.
pub struct Volume {
    pub(crate) name: String,
    pub(crate) device: Option<Box<dyn DeviceIO>>,
    pub(crate) version: NtfsVersion,
    pub(crate) geometry: Geometry,
    pub(crate) zones: Zones,
    /// Record number the next record search starts from.
    pub(crate) mft_data_pos: u64,

    pub(crate) lcn_bitmap: Option<BitmapStream>,
    pub(crate) mft_data: Option<AttrStream>,
    pub(crate) mft_bitmap: Option<BitmapStream>,
    pub(crate) mftmirr: Option<AttrStream>,
    pub(crate) logfile: Option<AttrStream>,
    pub(crate) upcase: Option<Upcase>,
    pub(crate) attrdef: Option<AttrDef>,

    pub(crate) state: VolumeState,
    pub(crate) flags: VolumeFlags,
    pub(crate) pending_flags: Option<VolumeFlags>,
    pub(crate) mount_state: MountState,
    pub(crate) journal: JournalState,
    pub(crate) mftmirr_mismatch: bool,
    pub(crate) dir_cache: Option<DirCache>,
}

/// Zeroed volume: no device, no streams, default zone multiplier.
pub fn alloc_volume() -> Volume {
    Volume {
        name: String::new(),
        device: None,
        version: NtfsVersion::default(),
        geometry: Geometry::default(),
        zones: Zones { mft_zone_multiplier: DEFAULT_MFT_ZONE_MULTIPLIER, ..Zones::default() },
        mft_data_pos: FIRST_USER_RECORD,
        lcn_bitmap: None,
        mft_data: None,
        mft_bitmap: None,
        mftmirr: None,
        logfile: None,
        upcase: None,
        attrdef: None,
        state: VolumeState::empty(),
        flags: VolumeFlags::empty(),
        pending_flags: None,
        mount_state: MountState::Unallocated,
        journal: JournalState::default(),
        mftmirr_mismatch: false,
        dir_cache: None,
    }
}

impl Default for Volume {
    fn default() -> Self {
        alloc_volume()
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("geometry", &self.geometry)
            .field("zones", &self.zones)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("mount_state", &self.mount_state)
            .field("journal", &self.journal)
            .field("has_device", &self.device.is_some())
            .finish_non_exhaustive()
    }
}

/// The attached device, as a plain trait object.
#[inline]
pub(crate) fn device_of(device: &mut Option<Box<dyn DeviceIO>>) -> NtfsResult<&mut (dyn DeviceIO + 'static)> {
    device.as_deref_mut().ok_or(NtfsError::InvalidState("no device attached"))
}

impl Volume {
    /// Volume label from `$VOLUME_NAME`; empty when the volume has none.
    #[inline] pub fn name(&self) -> &str { &self.name }
    #[inline] pub fn version(&self) -> NtfsVersion { self.version }
    #[inline] pub fn geometry(&self) -> &Geometry { &self.geometry }
    #[inline] pub fn state(&self) -> VolumeState { self.state }
    #[inline] pub fn mount_state(&self) -> MountState { self.mount_state }
    #[inline] pub fn is_read_only(&self) -> bool { self.state.is_read_only() }
    #[inline] pub fn nr_clusters(&self) -> u64 { self.geometry.nr_clusters }
    #[inline] pub fn mft_data_pos(&self) -> u64 { self.mft_data_pos }
    #[inline] pub fn upcase(&self) -> Option<&Upcase> { self.upcase.as_ref() }
    #[inline] pub fn attrdef(&self) -> Option<&AttrDef> { self.attrdef.as_ref() }

    /// Set at mount when the first `$MFTMirr` records differ from `$MFT`, or
    /// later when a mirror write fails.
    #[inline]
    pub fn is_mftmirr_mismatch(&self) -> bool {
        self.mftmirr_mismatch
    }

    pub fn set_case_sensitive(&mut self, on: bool) {
        self.state.set_case_sensitive(on);
    }

    /// Whether the version read from `$Volume` is one this crate handles.
    #[inline]
    pub fn is_version_supported(&self) -> bool {
        self.version.is_supported()
    }

    /// Device the volume runs on, for callers layering their own I/O.
    pub fn device_mut(&mut self) -> Option<&mut (dyn DeviceIO + 'static)> {
        self.device.as_deref_mut()
    }

    /// Raw `$Bitmap`, one bit per cluster.
    pub fn cluster_bitmap(&self) -> Option<&[u8]> {
        self.lcn_bitmap.as_ref().map(|b| b.as_bytes())
    }

    /// Raw `$MFT:$BITMAP`, one bit per record.
    pub fn mft_bitmap(&self) -> Option<&[u8]> {
        self.mft_bitmap.as_ref().map(|b| b.as_bytes())
    }

    #[inline]
    pub(crate) fn ensure_writable(&self) -> NtfsResult {
        ensure!(!self.state.is_read_only(), NtfsError::ReadOnlyViolation);
        Ok(())
    }

    #[inline]
    pub(crate) fn ensure_ready(&self) -> NtfsResult {
        ensure!(self.mount_state == MountState::Ready, NtfsError::InvalidState("volume not mounted"));
        Ok(())
    }

    // === Directory cache ===

    /// Attaches an LRU cache of `capacity` directory blocks, replacing any
    /// previous one.
    pub fn attach_dir_cache(&mut self, capacity: usize) -> NtfsResult {
        let capacity = NonZeroUsize::new(capacity).ok_or(NtfsError::InvalidState("cache capacity must be non-zero"))?;
        self.dir_cache = Some(DirCache::new(capacity));
        Ok(())
    }

    #[inline]
    pub fn dir_cache(&mut self) -> Option<&mut DirCache> {
        self.dir_cache.as_mut()
    }

    pub fn detach_dir_cache(&mut self) -> Option<DirCache> {
        self.dir_cache.take()
    }

    // === MFT records ===

    /// Reads record `number` through `$MFT:$DATA`.
    pub fn read_mft_record(&mut self, number: u64) -> NtfsResult<MftRecord> {
        let rs = self.geometry.mft_record_size as u64;
        let mft = self
            .mft_data
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        let end = number.checked_add(1).and_then(|n| n.checked_mul(rs));
        ensure!(end.is_some_and(|e| e <= mft.len()), FormatError::OutOfRange("MFT record number"));

        let io = device_of(&mut self.device)?;
        let mut raw = vec![0u8; rs as usize];
        mft.read_at(io, number * rs, &mut raw)?;
        Ok(MftRecord::from_disk(number, raw)?)
    }

    /// Writes `rec` back with fresh fixups. Records covered by `$MFTMirr`
    /// are written there too; a failed mirror write is reported and
    /// remembered, the `$MFT` copy stands.
    pub fn write_mft_record(&mut self, rec: &mut MftRecord) -> NtfsResult {
        self.ensure_writable()?;
        let rs = self.geometry.mft_record_size as u64;
        let number = rec.number();
        let mft = self
            .mft_data
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        ensure!(rec.size() as u64 == rs, FormatError::CorruptRecord(number));

        let io = device_of(&mut self.device)?;
        let raw = rec.to_disk();
        mft.write_at(io, number * rs, &raw)?;

        if number < self.geometry.mftmirr_size {
            if let Some(mirr) = &self.mftmirr {
                if let Err(e) = mirr.write_at(io, number * rs, &raw) {
                    warn!("$MFTMirr write of record {number} failed: {e}");
                    self.mftmirr_mismatch = true;
                }
            }
        }
        Ok(())
    }

    // === Volume flags ===

    /// Flags persisted in `$VOLUME_INFORMATION`, with any deferred change applied.
    #[inline]
    pub fn volume_flags(&self) -> VolumeFlags {
        self.pending_flags.unwrap_or(self.flags)
    }

    /// Rewrites the flag word of `$VOLUME_INFORMATION` now.
    pub fn write_volume_flags(&mut self, flags: VolumeFlags) -> NtfsResult {
        self.ensure_writable()?;
        let mut rec = self.read_mft_record(FILE_VOLUME)?;
        let attr = rec.require(AT_VOLUME_INFORMATION)?;
        let value = rec.resident_value_mut(&attr)?;
        ensure!(value.len() >= VOLUME_INFORMATION_SIZE, FormatError::CorruptRecord(FILE_VOLUME));
        put_u16(value, VOLINFO_FLAGS, flags.bits());

        self.write_mft_record(&mut rec)?;
        self.flags = flags;
        self.pending_flags = None;
        debug!("volume flags set to {flags:?}");
        Ok(())
    }

    /// Records a flag change to be written at unmount.
    pub fn set_volume_flags(&mut self, flags: VolumeFlags) -> NtfsResult {
        self.ensure_writable()?;
        self.pending_flags = Some(flags);
        Ok(())
    }

    /// Reads every byte of the `attr_type` stream of record `number`.
    pub(crate) fn read_system_stream(&mut self, number: u64, attr_type: u32) -> NtfsResult<(AttrStream, Vec<u8>)> {
        let rec = self.read_mft_record(number)?;
        let stream = AttrStream::open(&rec, attr_type, self.geometry.cluster_size, self.geometry.nr_clusters)?;
        let io = device_of(&mut self.device)?;
        let bytes = stream.read_all(io)?;
        Ok((stream, bytes))
    }
}
