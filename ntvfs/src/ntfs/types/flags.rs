// SPDX-License-Identifier: MIT

use bitflags::bitflags;

bitflags! {
    /// In-memory state bits of a mounted volume.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VolumeState: u8 {
        const READ_ONLY      = 0x01;
        const CASE_SENSITIVE = 0x02;
        const LOGFILE_EMPTY  = 0x04;
        const NO_ATIME       = 0x08;
    }
}

impl VolumeState {
    #[inline] pub fn is_read_only(&self) -> bool { self.contains(Self::READ_ONLY) }
    #[inline] pub fn set_read_only(&mut self, on: bool) { self.set(Self::READ_ONLY, on) }

    #[inline] pub fn is_case_sensitive(&self) -> bool { self.contains(Self::CASE_SENSITIVE) }
    #[inline] pub fn set_case_sensitive(&mut self, on: bool) { self.set(Self::CASE_SENSITIVE, on) }

    #[inline] pub fn is_logfile_empty(&self) -> bool { self.contains(Self::LOGFILE_EMPTY) }
    #[inline] pub fn set_logfile_empty(&mut self, on: bool) { self.set(Self::LOGFILE_EMPTY, on) }

    #[inline] pub fn is_no_atime(&self) -> bool { self.contains(Self::NO_ATIME) }
    #[inline] pub fn set_no_atime(&mut self, on: bool) { self.set(Self::NO_ATIME, on) }
}

bitflags! {
    /// Persisted flag word of `$VOLUME_INFORMATION` (record 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VolumeFlags: u16 {
        const IS_DIRTY            = 0x0001;
        const RESIZE_LOG_FILE     = 0x0002;
        const UPGRADE_ON_MOUNT    = 0x0004;
        const MOUNTED_ON_NT4      = 0x0008;
        const DELETE_USN_UNDERWAY = 0x0010;
        const REPAIR_OBJECT_ID    = 0x0020;
        const CHKDSK_UNDERWAY     = 0x4000;
        const MODIFIED_BY_CHKDSK  = 0x8000;
    }
}

bitflags! {
    /// Caller-supplied mount options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MountFlags: u32 {
        const RDONLY    = 0x0001;
        const NOATIME   = 0x0002;
        /// Refuse to mount a device the host already has mounted.
        const EXCLUSIVE = 0x0004;
    }
}

bitflags! {
    /// Answer of `check_if_mounted`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MountedFlags: u8 {
        const MOUNTED   = 0x01;
        const IS_ROOT   = 0x02;
        const READ_ONLY = 0x04;
    }
}

impl From<MountFlags> for VolumeState {
    fn from(flags: MountFlags) -> Self {
        let mut state = VolumeState::empty();
        state.set_read_only(flags.contains(MountFlags::RDONLY));
        state.set_no_atime(flags.contains(MountFlags::NOATIME));
        state
    }
}
