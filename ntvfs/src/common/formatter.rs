// SPDX-License-Identifier: MIT

use crate::common::errors::NtfsResult;

/// Lays a fresh filesystem down on a device.
///
/// Implementations hold everything they need (device, computed layout).
/// A full format also zeroes the clusters no metadata uses; a quick format
/// leaves them as they are.
pub trait FsFormatter {
    #[must_use = "format result must be checked for errors"]
    fn format(&mut self, full_format: bool) -> NtfsResult;

    #[must_use = "flush result must be checked for errors"]
    fn flush(&mut self) -> NtfsResult {
        Ok(())
    }
}
