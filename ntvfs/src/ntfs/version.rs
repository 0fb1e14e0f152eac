// SPDX-License-Identifier: MIT

use core::fmt;

use crate::common::errors::*;

/// NTFS on-disk version as stored in `$VOLUME_INFORMATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtfsVersion {
    pub major: u8,
    pub minor: u8,
}

impl NtfsVersion {
    pub const V1_1: Self = Self::new(1, 1);
    pub const V1_2: Self = Self::new(1, 2);
    pub const V3_0: Self = Self::new(3, 0);
    pub const V3_1: Self = Self::new(3, 1);

    #[inline]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    #[inline]
    pub fn is_supported(&self) -> bool {
        is_supported(self.major, self.minor)
    }

    /// Fails with `VersionUnsupported` for anything [`is_supported`] rejects.
    pub fn check(&self) -> NtfsResult<RecordSizePolicy> {
        mft_record_size_policy(self.major, self.minor).ok_or(NtfsError::VersionUnsupported {
            major: self.major,
            minor: self.minor,
        })
    }
}

impl fmt::Display for NtfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Recognized families: 1.1, 1.2, 2.x, 3.0 and 3.1.
#[inline]
pub const fn is_supported(major: u8, minor: u8) -> bool {
    matches!((major, minor), (1, 1) | (1, 2) | (2, _) | (3, 0) | (3, 1))
}

/// How the boot sector encodes MFT and index record sizes.
///
/// Every supported version stores a signed byte: a positive value counts
/// clusters, a negative value `v` means `2^|v|` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSizePolicy {
    SignedClustersOrShift,
}

impl RecordSizePolicy {
    /// Decodes a raw boot-sector record-size byte into bytes.
    pub fn decode(self, raw: i8, cluster_size: u32) -> FormatResult<u32> {
        match self {
            RecordSizePolicy::SignedClustersOrShift => {
                let size = if raw > 0 {
                    cluster_size.checked_mul(raw as u32)
                } else if raw < 0 {
                    let shift = raw.unsigned_abs() as u32;
                    1u32.checked_shl(shift).filter(|_| shift < 31)
                } else {
                    None
                };
                let size = size.ok_or(FormatError::OutOfRange("record size"))?;
                ensure!(
                    size.is_power_of_two(),
                    FormatError::NotPowerOfTwo { field: "record size", value: size as u64 }
                );
                Ok(size)
            }
        }
    }

    /// Inverse of [`decode`](Self::decode): the byte the formatter stores.
    pub fn encode(self, size: u32, cluster_size: u32) -> FormatResult<i8> {
        ensure!(
            size.is_power_of_two(),
            FormatError::NotPowerOfTwo { field: "record size", value: size as u64 }
        );
        match self {
            RecordSizePolicy::SignedClustersOrShift => {
                if size >= cluster_size {
                    let clusters = size / cluster_size;
                    i8::try_from(clusters).map_err(|_| FormatError::OutOfRange("record size"))
                } else {
                    Ok(-(size.trailing_zeros() as i8))
                }
            }
        }
    }
}

/// `None` for unsupported versions.
#[inline]
pub fn mft_record_size_policy(major: u8, minor: u8) -> Option<RecordSizePolicy> {
    is_supported(major, minor).then_some(RecordSizePolicy::SignedClustersOrShift)
}
