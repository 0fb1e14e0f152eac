// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Result type for device operations.
pub type DeviceIOResult<T = ()> = core::result::Result<T, DeviceIOError>;

/// Error type for device operations.
///
/// Propagated unchanged by the volume layer, which wraps it without
/// reinterpretation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIOError {
    /// Access past the end of the device.
    #[error("out of bounds")]
    OutOfBounds,

    /// Write attempted on a device opened read-only.
    #[error("device is read-only")]
    ReadOnly,

    #[error("unsupported operation")]
    Unsupported,

    /// Host I/O failure.
    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(std::io::ErrorKind),

    #[error("{0}")]
    Other(&'static str),
}

impl From<&'static str> for DeviceIOError {
    #[inline]
    fn from(msg: &'static str) -> Self {
        DeviceIOError::Other(msg)
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for DeviceIOError {
    #[cold]
    #[inline(never)]
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => DeviceIOError::OutOfBounds,
            kind => DeviceIOError::Io(kind),
        }
    }
}
