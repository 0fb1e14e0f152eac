// SPDX-License-Identifier: MIT

use thiserror::Error;

pub use ntvio::errors::*;

/// On-disk structure that does not match what NTFS requires.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("missing boot sector signature")]
    BadBootSignature,

    #[error("not an NTFS volume")]
    NotNtfs,

    #[error("{field} is not a power of two ({value})")]
    NotPowerOfTwo { field: &'static str, value: u64 },

    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("volume extends past the end of the device")]
    VolumeTooLarge,

    #[error("record {0} has a bad magic")]
    BadRecordMagic(u64),

    #[error("record {0} failed its update sequence check")]
    FixupMismatch(u64),

    #[error("record {0} is corrupt")]
    CorruptRecord(u64),

    #[error("corrupt mapping pairs")]
    CorruptRunlist,

    /// A run maps clusters at or past `nr_clusters`.
    #[error("record {record} maps clusters up to {lcn_end}, past the end of the volume")]
    RunPastVolume { record: u64, lcn_end: u64 },

    #[error("attribute 0x{attr_type:x} missing from record {record}")]
    MissingAttribute { record: u64, attr_type: u32 },

    /// The attribute lives in an extension record reached through `$ATTRIBUTE_LIST`.
    #[error("record {0} needs $ATTRIBUTE_LIST traversal")]
    AttributeListUnsupported(u64),

    #[error("bitmap holds {bits} bits for {needed} units")]
    BitmapTooShort { bits: u64, needed: u64 },

    #[error("{0}")]
    Invalid(&'static str),
}

/// Allocator-level refusals.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("no space left")]
    NoSpace,

    /// Freed run lies outside the volume or covers clusters not in use.
    #[error("invalid run at lcn {lcn} (+{len})")]
    InvalidRun { lcn: u64, len: u64 },

    /// Reserved, out of range, or not in use.
    #[error("invalid MFT record {0}")]
    InvalidRecord(u64),

    #[error("volume is read-only")]
    ReadOnly,
}

/// Top-level error of the volume core.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NtfsError {
    /// Propagated from the device unchanged.
    #[error("device: {0}")]
    Device(#[from] DeviceIOError),

    #[error("format: {0}")]
    Format(#[from] FormatError),

    #[error("unsupported NTFS version {major}.{minor}")]
    VersionUnsupported { major: u8, minor: u8 },

    #[error("no space left on volume")]
    NoSpace,

    #[error("volume is read-only")]
    ReadOnlyViolation,

    #[error("volume is busy")]
    Busy,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("allocator: {0}")]
    Alloc(AllocError),
}

impl From<AllocError> for NtfsError {
    #[inline]
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::NoSpace => NtfsError::NoSpace,
            AllocError::ReadOnly => NtfsError::ReadOnlyViolation,
            other => NtfsError::Alloc(other),
        }
    }
}

impl From<&'static str> for FormatError {
    #[inline]
    fn from(msg: &'static str) -> Self {
        FormatError::Invalid(msg)
    }
}

// === type *Result ===

pub type NtfsResult<T = ()> = Result<T, NtfsError>;
pub type FormatResult<T = ()> = Result<T, FormatError>;
