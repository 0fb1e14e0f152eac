// SPDX-License-Identifier: MIT

//! Mount lifecycle: boot sector, metadata streams, version gate, journal
//! check and allocator setup, then unmount.

use alloc::{boxed::Box, string::String};

use log::{debug, info, warn};
use ntvio::{DeviceIO, DeviceIOStructExt};

use crate::common::errors::*;
use crate::ntfs::{
    attrdef::AttrDef,
    bitmap::BitmapStream,
    constant::*,
    inode::MftRecord,
    logfile::JournalState,
    stream::AttrStream,
    types::*,
    upcase::Upcase,
    utils::*,
    version::NtfsVersion,
    volume::{Geometry, Volume, alloc_volume, device_of},
};

/// Progress of a volume through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MountState {
    #[default]
    Unallocated,
    GeometryLoaded,
    MetadataLoaded,
    VersionChecked,
    JournalChecked,
    Ready,
    Failed,
    Unmounted,
}

/// Mount-time configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    pub flags: MountFlags,
    /// MFT zone size is `nr_clusters / multiplier`, 1..=8.
    pub mft_zone_multiplier: u8,
}

impl MountOptions {
    pub fn new(flags: MountFlags) -> Self {
        Self { flags, mft_zone_multiplier: DEFAULT_MFT_ZONE_MULTIPLIER }
    }

    pub fn with_mft_zone_multiplier(mut self, multiplier: u8) -> Self {
        self.mft_zone_multiplier = multiplier;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.flags |= MountFlags::RDONLY;
        self
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::new(MountFlags::empty())
    }
}

impl From<MountFlags> for MountOptions {
    fn from(flags: MountFlags) -> Self {
        Self::new(flags)
    }
}

/// Reads and validates the boot sector, leaving the volume in
/// `GeometryLoaded` with `device` attached.
pub fn startup(mut device: Box<dyn DeviceIO>, flags: MountFlags) -> NtfsResult<Volume> {
    let mut vol = alloc_volume();
    vol.state = VolumeState::from(flags);
    if device.is_read_only() {
        vol.state.set_read_only(true);
    }

    let boot: NtfsBootSector = device.read_struct(0)?;
    let geometry = Geometry::from_boot(&boot, device.size())?;
    debug!(
        "boot sector: {} clusters of {} bytes, {}-byte records, $MFT at {}, $MFTMirr at {}",
        geometry.nr_clusters,
        geometry.cluster_size,
        geometry.mft_record_size,
        geometry.mft_lcn,
        geometry.mftmirr_lcn
    );

    vol.device = Some(device);
    vol.geometry = geometry;
    vol.mount_state = MountState::GeometryLoaded;
    Ok(vol)
}

/// Mounts the volume on `device` with default options besides `flags`.
pub fn device_mount(device: Box<dyn DeviceIO>, flags: MountFlags) -> NtfsResult<Volume> {
    device_mount_with(device, MountOptions::new(flags))
}

pub fn device_mount_with(device: Box<dyn DeviceIO>, opts: MountOptions) -> NtfsResult<Volume> {
    ensure!(
        (1..=MAX_MFT_ZONE_MULTIPLIER).contains(&opts.mft_zone_multiplier),
        NtfsError::InvalidState("mft zone multiplier out of range")
    );
    let mut vol = startup(device, opts.flags)?;
    vol.zones.mft_zone_multiplier = opts.mft_zone_multiplier;

    vol.mount_step(MountState::MetadataLoaded, Volume::load_metadata)?;
    vol.mount_step(MountState::VersionChecked, Volume::check_version)?;
    vol.mount_step(MountState::JournalChecked, Volume::check_journal)?;
    vol.mount_step(MountState::Ready, Volume::init_allocators)?;

    info!(
        "mounted NTFS {} volume \"{}\" ({} clusters, {} free){}",
        vol.version,
        vol.name,
        vol.geometry.nr_clusters,
        vol.free_cluster_count(),
        if vol.state.is_read_only() { " read-only" } else { "" }
    );
    Ok(vol)
}

/// Opens the image or block device at `path` and mounts it.
#[cfg(feature = "std")]
pub fn mount<P: AsRef<std::path::Path>>(path: P, flags: MountFlags) -> NtfsResult<Volume> {
    mount_with(path, MountOptions::new(flags))
}

#[cfg(feature = "std")]
pub fn mount_with<P: AsRef<std::path::Path>>(path: P, opts: MountOptions) -> NtfsResult<Volume> {
    let path = path.as_ref();
    if opts.flags.contains(MountFlags::EXCLUSIVE) {
        let mounted = crate::ntfs::mounted::check_if_mounted(path)?;
        if mounted.contains(MountedFlags::MOUNTED) {
            warn!("{} is mounted by the host", path.display());
            return Err(NtfsError::Busy);
        }
    }
    let read_only = opts.flags.contains(MountFlags::RDONLY);
    let device = ntvio::prelude::FileDeviceIO::open(path, read_only)?;
    device_mount_with(Box::new(device), opts)
}

impl Volume {
    fn mount_step(&mut self, next: MountState, step: fn(&mut Volume) -> NtfsResult) -> NtfsResult {
        match step(self) {
            Ok(()) => {
                debug!("mount: {:?} -> {next:?}", self.mount_state);
                self.mount_state = next;
                Ok(())
            }
            Err(e) => {
                debug!("mount failed after {:?}: {e}", self.mount_state);
                self.mount_state = MountState::Failed;
                Err(e)
            }
        }
    }

    fn load_metadata(&mut self) -> NtfsResult {
        self.load_mft()?;
        self.load_mftmirr()?;
        self.load_lcn_bitmap()?;
        self.load_upcase()?;
        self.load_attrdef()?;
        self.load_volume_info()?;
        self.load_logfile()
    }

    /// Record 0 is read straight from `mft_lcn`; its `$DATA` then maps the
    /// rest of `$MFT`.
    fn load_mft(&mut self) -> NtfsResult {
        let g = self.geometry;
        let rs = g.mft_record_size as u64;
        let io = device_of(&mut self.device)?;

        let mut raw = alloc::vec![0u8; rs as usize];
        io.read_at(g.cluster_offset(g.mft_lcn), &mut raw)?;
        let rec0 = MftRecord::from_disk(FILE_MFT, raw)?;

        let data = AttrStream::open(&rec0, AT_DATA, g.cluster_size, g.nr_clusters)?;
        let first_lcn = data.runlist().and_then(|rl| rl.runs().first()).and_then(|r| r.lcn);
        ensure!(first_lcn == Some(g.mft_lcn), FormatError::Invalid("$MFT does not start at mft_lcn"));
        let records = data.len() / rs;
        ensure!(records > FILE_EXTEND, FormatError::Invalid("$MFT too small"));

        let bitmap = BitmapStream::load(io, AttrStream::open(&rec0, AT_BITMAP, g.cluster_size, g.nr_clusters)?)?;
        ensure!(
            bitmap.bit_len() >= records,
            FormatError::BitmapTooShort { bits: bitmap.bit_len(), needed: records }
        );
        debug!("$MFT: {records} records, {} in use", bitmap.count_ones(0, records));

        self.mft_data = Some(data);
        self.mft_bitmap = Some(bitmap);
        Ok(())
    }

    /// Compares the mirrored records; a mismatch is logged, not fixed.
    fn load_mftmirr(&mut self) -> NtfsResult {
        let rec = self.read_mft_record(FILE_MFTMIRR)?;
        let mirr = AttrStream::open(&rec, AT_DATA, self.geometry.cluster_size, self.geometry.nr_clusters)?;
        let rs = self.geometry.mft_record_size as usize;
        let count = self.geometry.mftmirr_size as usize;
        ensure!(mirr.len() >= (count * rs) as u64, FormatError::Invalid("$MFTMirr too small"));

        let mft = self
            .mft_data
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        let io = device_of(&mut self.device)?;
        let mut primary = alloc::vec![0u8; count * rs];
        let mut mirror = alloc::vec![0u8; count * rs];
        mft.read_at(io, 0, &mut primary)?;
        mirr.read_at(io, 0, &mut mirror)?;

        let mut mismatch = false;
        for (i, (a, b)) in primary.chunks(rs).zip(mirror.chunks(rs)).enumerate() {
            if a != b {
                warn!("$MFTMirr record {i} differs from $MFT");
                mismatch = true;
            }
        }
        self.mftmirr = Some(mirr);
        self.mftmirr_mismatch = mismatch;
        Ok(())
    }

    fn load_lcn_bitmap(&mut self) -> NtfsResult {
        let rec = self.read_mft_record(FILE_BITMAP)?;
        let stream = AttrStream::open(&rec, AT_DATA, self.geometry.cluster_size, self.geometry.nr_clusters)?;
        let io = device_of(&mut self.device)?;
        let bitmap = BitmapStream::load(io, stream)?;
        let nr = self.geometry.nr_clusters;
        ensure!(bitmap.bit_len() >= nr, FormatError::BitmapTooShort { bits: bitmap.bit_len(), needed: nr });
        self.lcn_bitmap = Some(bitmap);
        Ok(())
    }

    fn load_upcase(&mut self) -> NtfsResult {
        let (_, bytes) = self.read_system_stream(FILE_UPCASE, AT_DATA)?;
        self.upcase = Some(Upcase::from_bytes(&bytes)?);
        Ok(())
    }

    fn load_attrdef(&mut self) -> NtfsResult {
        let (_, bytes) = self.read_system_stream(FILE_ATTRDEF, AT_DATA)?;
        self.attrdef = Some(AttrDef::from_bytes(bytes)?);
        Ok(())
    }

    fn load_volume_info(&mut self) -> NtfsResult {
        let rec = self.read_mft_record(FILE_VOLUME)?;
        self.name = match rec.find(AT_VOLUME_NAME)? {
            Some(attr) if !attr.non_resident => utf16le_to_string(rec.resident_value(&attr)?),
            _ => String::new(),
        };

        let attr = rec.require(AT_VOLUME_INFORMATION)?;
        ensure!(!attr.non_resident, FormatError::CorruptRecord(FILE_VOLUME));
        let info = rec.resident_value(&attr)?;
        ensure!(info.len() >= VOLUME_INFORMATION_SIZE, FormatError::CorruptRecord(FILE_VOLUME));
        self.version = NtfsVersion::new(info[VOLINFO_MAJOR], info[VOLINFO_MINOR]);
        self.flags = VolumeFlags::from_bits_retain(get_u16(info, VOLINFO_FLAGS));
        debug!("$Volume: \"{}\", version {}, flags {:?}", self.name, self.version, self.flags);
        Ok(())
    }

    fn load_logfile(&mut self) -> NtfsResult {
        let rec = self.read_mft_record(FILE_LOGFILE)?;
        let logfile = AttrStream::open(&rec, AT_DATA, self.geometry.cluster_size, self.geometry.nr_clusters)?;
        ensure!(!logfile.is_empty(), FormatError::Invalid("empty $LogFile"));
        self.logfile = Some(logfile);
        Ok(())
    }

    fn check_version(&mut self) -> NtfsResult {
        self.version.check()?;
        Ok(())
    }

    fn check_journal(&mut self) -> NtfsResult {
        let journal = self.check_logfile()?;
        match journal {
            JournalState::Empty => self.state.set_logfile_empty(true),
            JournalState::Clean => {}
            JournalState::Dirty => warn!("$LogFile is not clean; the volume was not shut down cleanly"),
        }
        self.journal = journal;
        Ok(())
    }

    fn init_allocators(&mut self) -> NtfsResult {
        self.init_zones()?;
        self.mft_data_pos = FIRST_USER_RECORD;
        Ok(())
    }

    /// Writes pending flag changes, flushes and releases the device.
    ///
    /// Without `force`, a failed flush or writes still pending on the device
    /// leave the volume mounted and return `Busy`. With `force`, problems are
    /// logged and the volume is torn down anyway.
    pub fn umount(&mut self, force: bool) -> NtfsResult {
        ensure!(self.device.is_some(), NtfsError::InvalidState("volume not mounted"));

        if let Some(flags) = self.pending_flags {
            if let Err(e) = self.write_volume_flags(flags) {
                if !force {
                    return Err(e);
                }
                warn!("forced unmount: volume flags not written: {e}");
            }
        }

        let io = device_of(&mut self.device)?;
        let flushed = io.flush();
        if flushed.is_err() || io.has_pending_writes() {
            if !force {
                debug!("unmount refused: device still has unflushed writes");
                return Err(NtfsError::Busy);
            }
            match flushed {
                Err(e) => warn!("forced unmount: flush failed: {e}"),
                Ok(()) => warn!("forced unmount with writes still pending"),
            }
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                warn!("closing device failed: {e}");
            }
        }
        self.release();
        self.mount_state = MountState::Unmounted;
        info!("unmounted \"{}\"", self.name);
        Ok(())
    }

    fn release(&mut self) {
        self.lcn_bitmap = None;
        self.mft_data = None;
        self.mft_bitmap = None;
        self.mftmirr = None;
        self.logfile = None;
        self.upcase = None;
        self.attrdef = None;
        self.dir_cache = None;
        self.pending_flags = None;
    }
}
