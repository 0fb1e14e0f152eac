// SPDX-License-Identifier: MIT

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::common::errors::*;
use crate::ntfs::constant::*;

/// NTFS boot sector (first 512 bytes of the volume).
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C, packed)]
pub struct NtfsBootSector {
    pub jump_boot: [u8; 3],
    pub oem_id: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fats: u8,
    pub root_entries: u16,
    pub sectors: u16,
    pub media_type: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub large_sectors: u32,
    pub physical_drive: u8,
    pub current_head: u8,
    pub extended_boot_signature: u8,
    pub reserved2: u8,
    pub number_of_sectors: u64,
    pub mft_lcn: u64,
    pub mftmirr_lcn: u64,
    pub clusters_per_mft_record: i8,
    pub reserved0: [u8; 3],
    pub clusters_per_index_record: i8,
    pub reserved1: [u8; 3],
    pub volume_serial_number: u64,
    pub checksum: u32,
    pub bootstrap: [u8; 426],
    pub end_of_sector_marker: u16,
}

impl NtfsBootSector {
    /// Builds a boot sector; sizes are in bytes except `number_of_sectors`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sector_size: u16,
        cluster_size: u32,
        number_of_sectors: u64,
        mft_lcn: u64,
        mftmirr_lcn: u64,
        clusters_per_mft_record: i8,
        clusters_per_index_record: i8,
        serial: u64,
    ) -> Self {
        Self {
            jump_boot: NTFS_JUMP_BOOT,
            oem_id: *NTFS_OEM_ID,
            bytes_per_sector: sector_size,
            sectors_per_cluster: encode_sectors_per_cluster(cluster_size / sector_size as u32),
            reserved_sectors: 0,
            fats: 0,
            root_entries: 0,
            sectors: 0,
            media_type: NTFS_MEDIA_DESCRIPTOR,
            sectors_per_fat: 0,
            sectors_per_track: 63,
            heads: 255,
            hidden_sectors: 0,
            large_sectors: 0,
            physical_drive: 0x80,
            current_head: 0,
            extended_boot_signature: 0x80,
            reserved2: 0,
            number_of_sectors,
            mft_lcn,
            mftmirr_lcn,
            clusters_per_mft_record,
            reserved0: [0u8; 3],
            clusters_per_index_record,
            reserved1: [0u8; 3],
            volume_serial_number: serial,
            checksum: 0,
            bootstrap: [0u8; 426],
            end_of_sector_marker: NTFS_BOOT_SIGNATURE,
        }
    }

    /// Checks the signature and OEM id.
    pub fn check_signature(&self) -> FormatResult {
        let marker = self.end_of_sector_marker;
        ensure!(marker == NTFS_BOOT_SIGNATURE, FormatError::BadBootSignature);
        ensure!(&self.oem_id == NTFS_OEM_ID, FormatError::NotNtfs);
        Ok(())
    }

    /// Sectors per cluster, decoding the negative big-cluster form
    /// (`0xF4` = 2^12 sectors).
    pub fn sectors_per_cluster(&self) -> u32 {
        let raw = self.sectors_per_cluster;
        if raw > 0x80 {
            1u32 << (256 - raw as u32).min(31)
        } else {
            raw as u32
        }
    }
}

fn encode_sectors_per_cluster(spc: u32) -> u8 {
    if spc <= 0x80 {
        spc as u8
    } else {
        (256 - spc.trailing_zeros()) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn test_layout() {
        assert_eq!(core::mem::size_of::<NtfsBootSector>(), NTFS_BOOT_SECTOR_SIZE);
        let bs = NtfsBootSector::new(512, 4096, 8191, 4, 2, -10, 1, 0x1234);
        let raw = bs.as_bytes();
        assert_eq!(&raw[3..11], b"NTFS    ");
        assert_eq!(u16::from_le_bytes([raw[11], raw[12]]), 512);
        assert_eq!(raw[13], 8);
        assert_eq!(u64::from_le_bytes(raw[40..48].try_into().unwrap()), 8191);
        assert_eq!(u64::from_le_bytes(raw[48..56].try_into().unwrap()), 4);
        assert_eq!(raw[64], 0xF6);
        assert_eq!(raw[68], 1);
        assert_eq!(&raw[510..512], &[0x55, 0xAA]);
    }

    #[test]
    fn test_big_cluster_encoding() {
        // 2 MiB clusters with 512-byte sectors: 4096 sectors per cluster
        let bs = NtfsBootSector::new(512, 2 * 1024 * 1024, 1 << 24, 4, 2, -10, -12, 0);
        assert_eq!(bs.sectors_per_cluster, 0xF4);
        assert_eq!(bs.sectors_per_cluster(), 4096);
    }

    #[test]
    fn test_signature_checks() {
        let mut bs = NtfsBootSector::new(512, 4096, 8191, 4, 2, -10, 1, 0);
        assert_eq!(bs.check_signature(), Ok(()));
        bs.oem_id = *b"EXFAT   ";
        assert_eq!(bs.check_signature(), Err(FormatError::NotNtfs));
        bs.end_of_sector_marker = 0;
        assert_eq!(bs.check_signature(), Err(FormatError::BadBootSignature));
    }
}
