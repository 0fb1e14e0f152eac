// SPDX-License-Identifier: MIT

pub mod attrdef;
pub mod bitmap;
pub mod cache;
pub mod cluster;
pub mod constant;
pub mod formatter;
pub mod inode;
pub mod logfile;
pub mod mft;
pub mod mount;
#[cfg(feature = "std")]
pub mod mounted;
pub mod runlist;
pub mod stream;
pub mod types;
pub mod upcase;
pub mod utils;
pub mod version;
pub mod volume;

// === Public Interface ===
pub mod prelude {
    pub use super::cluster::{ClusterRun, ZoneHint, Zones};
    pub use super::formatter::{FormatParams, NtfsFormatter, NtfsLayout};
    pub use super::inode::MftRecord;
    pub use super::logfile::JournalState;
    pub use super::mount::{MountOptions, MountState, device_mount, device_mount_with, startup};
    #[cfg(feature = "std")]
    pub use super::mount::{mount, mount_with};
    #[cfg(feature = "std")]
    pub use super::mounted::check_if_mounted;
    pub use super::types::*;
    pub use super::version::{NtfsVersion, is_supported};
    pub use super::volume::{Geometry, Volume, alloc_volume};
    pub use crate::common::errors::*;
    pub use crate::common::formatter::FsFormatter;
    pub use ntvio::prelude::*;
}
