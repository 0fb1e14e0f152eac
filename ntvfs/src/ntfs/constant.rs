// SPDX-License-Identifier: MIT

// Boot sector

pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";
pub const NTFS_BOOT_SIGNATURE: u16 = 0xAA55;
pub const NTFS_JUMP_BOOT: [u8; 3] = [0xEB, 0x52, 0x90];
pub const NTFS_MEDIA_DESCRIPTOR: u8 = 0xF8;
pub const NTFS_BOOT_SECTOR_SIZE: usize = 512;
/// $Boot covers the first 8 KiB of the volume.
pub const NTFS_BOOT_REGION_SIZE: u64 = 8192;

pub const NTFS_MIN_SECTOR_SIZE: u32 = 256;
pub const NTFS_MAX_SECTOR_SIZE: u32 = 4096;
pub const NTFS_MAX_CLUSTER_SIZE: u32 = 2 * 1024 * 1024;

// Update sequence arrays protect every 512-byte block, whatever the sector size.
pub const NTFS_BLOCK_SIZE: usize = 512;

// System file records

pub const FILE_MFT: u64 = 0;
pub const FILE_MFTMIRR: u64 = 1;
pub const FILE_LOGFILE: u64 = 2;
pub const FILE_VOLUME: u64 = 3;
pub const FILE_ATTRDEF: u64 = 4;
pub const FILE_ROOT: u64 = 5;
pub const FILE_BITMAP: u64 = 6;
pub const FILE_BOOT: u64 = 7;
pub const FILE_BADCLUS: u64 = 8;
pub const FILE_SECURE: u64 = 9;
pub const FILE_UPCASE: u64 = 10;
pub const FILE_EXTEND: u64 = 11;

/// Records 0..16 are always marked in use.
pub const SYSTEM_RECORDS: u64 = 16;
/// Records below this number are reserved: marked in use at format time
/// and never handed out by the record allocator.
pub const FIRST_USER_RECORD: u64 = 64;

// MFT records

pub const MFT_RECORD_MAGIC: &[u8; 4] = b"FILE";
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_IS_DIRECTORY: u16 = 0x0002;

pub const MFT_HDR_USA_OFS: usize = 4;
pub const MFT_HDR_USA_COUNT: usize = 6;
pub const MFT_HDR_LSN: usize = 8;
pub const MFT_HDR_SEQUENCE: usize = 16;
pub const MFT_HDR_LINK_COUNT: usize = 18;
pub const MFT_HDR_ATTRS_OFFSET: usize = 20;
pub const MFT_HDR_FLAGS: usize = 22;
pub const MFT_HDR_BYTES_IN_USE: usize = 24;
pub const MFT_HDR_BYTES_ALLOCATED: usize = 28;
pub const MFT_HDR_BASE_RECORD: usize = 32;
pub const MFT_HDR_NEXT_INSTANCE: usize = 40;
pub const MFT_HDR_RECORD_NUMBER: usize = 44;
/// Update sequence array offset of NTFS 3.1 records.
pub const MFT_HDR_SIZE: usize = 48;

// Attributes

pub const AT_STANDARD_INFORMATION: u32 = 0x10;
pub const AT_ATTRIBUTE_LIST: u32 = 0x20;
pub const AT_FILE_NAME: u32 = 0x30;
pub const AT_OBJECT_ID: u32 = 0x40;
pub const AT_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const AT_VOLUME_NAME: u32 = 0x60;
pub const AT_VOLUME_INFORMATION: u32 = 0x70;
pub const AT_DATA: u32 = 0x80;
pub const AT_INDEX_ROOT: u32 = 0x90;
pub const AT_INDEX_ALLOCATION: u32 = 0xA0;
pub const AT_BITMAP: u32 = 0xB0;
pub const AT_END: u32 = 0xFFFF_FFFF;

pub const ATTR_HDR_RESIDENT_SIZE: usize = 24;
pub const ATTR_HDR_NON_RESIDENT_SIZE: usize = 64;

// $VOLUME_INFORMATION value: 8 reserved bytes, major, minor, flags.
pub const VOLUME_INFORMATION_SIZE: usize = 12;
pub const VOLINFO_MAJOR: usize = 8;
pub const VOLINFO_MINOR: usize = 9;
pub const VOLINFO_FLAGS: usize = 10;

// $UpCase

pub const UPCASE_ENTRIES: usize = 65536;
pub const UPCASE_BYTES: usize = UPCASE_ENTRIES * 2;

// $AttrDef

pub const ATTRDEF_ENTRY_SIZE: usize = 160;

// $LogFile

pub const RSTR_MAGIC: &[u8; 4] = b"RSTR";
pub const CHKD_MAGIC: &[u8; 4] = b"CHKD";
pub const LOGFILE_PAGE_SIZE: usize = 4096;
pub const LOGFILE_NO_CLIENT: u16 = 0xFFFF;
pub const RESTART_VOLUME_IS_CLEAN: u16 = 0x0002;
pub const RESTART_HDR_AREA_OFFSET: usize = 0x18;
pub const RESTART_AREA_OFFSET: usize = 0x30;
pub const RESTART_AREA_CLIENT_IN_USE: usize = 12;
pub const RESTART_AREA_FLAGS: usize = 14;

// Allocator

/// MFT zone size is `nr_clusters / multiplier`; 4 reserves 25%.
pub const DEFAULT_MFT_ZONE_MULTIPLIER: u8 = 4;
pub const MAX_MFT_ZONE_MULTIPLIER: u8 = 8;

// Formatter defaults

pub const NTFS_DEFAULT_SECTOR_SIZE: u16 = 512;
pub const NTFS_DEFAULT_CLUSTER_SIZE: u32 = 4096;
pub const NTFS_DEFAULT_MFT_RECORD_SIZE: u32 = 1024;
pub const NTFS_DEFAULT_INDEX_RECORD_SIZE: u32 = 4096;
pub const NTFS_DEFAULT_MFT_RECORDS: u64 = 80;
pub const NTFS_DEFAULT_LOGFILE_SIZE: u64 = 256 * 1024;
