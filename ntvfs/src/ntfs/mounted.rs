// SPDX-License-Identifier: MIT

//! Asks the host whether a device is already mounted.

use std::path::Path;

use crate::common::errors::*;
use crate::ntfs::types::MountedFlags;

/// Mount tables consulted in order; the first readable one wins.
pub const MOUNT_TABLES: [&str; 2] = ["/proc/mounts", "/etc/mtab"];

/// Looks `path` up in the host mount table.
///
/// Hosts without a mount table report an unmounted device.
pub fn check_if_mounted<P: AsRef<Path>>(path: P) -> NtfsResult<MountedFlags> {
    let path = path.as_ref();
    #[cfg(unix)]
    {
        for table in MOUNT_TABLES {
            match std::fs::read_to_string(table) {
                Ok(text) => return Ok(parse_mount_table(&text, |fsname| same_device(fsname, path))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(DeviceIOError::from(e).into()),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(MountedFlags::empty())
}

/// Scans `fstab`-format text for the first entry whose source satisfies
/// `is_device`.
pub fn parse_mount_table(table: &str, mut is_device: impl FnMut(&str) -> bool) -> MountedFlags {
    for line in table.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(fsname), Some(dir)) = (fields.next(), fields.next()) else {
            continue;
        };
        let opts = fields.nth(1).unwrap_or("");

        if !is_device(&unescape(fsname)) {
            continue;
        }
        let mut flags = MountedFlags::MOUNTED;
        if unescape(dir) == "/" {
            flags |= MountedFlags::IS_ROOT;
        }
        if opts.split(',').any(|o| o == "ro") {
            flags |= MountedFlags::READ_ONLY;
        }
        return flags;
    }
    MountedFlags::empty()
}

/// Undoes the octal escapes (`\040` for a space) of mount tables.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|d| bytes[i] == b'\\' && d.iter().all(|b| (b'0'..=b'7').contains(b)));
        if let Some(digits) = octal {
            let v = digits.iter().fold(0u32, |acc, b| acc * 8 + (b - b'0') as u32);
            out.push(v as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(unix)]
fn same_device(fsname: &str, path: &Path) -> bool {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let (Ok(a), Ok(b)) = (std::fs::canonicalize(fsname), std::fs::canonicalize(path)) else {
        return false;
    };
    if a == b {
        return true;
    }
    match (std::fs::metadata(&a), std::fs::metadata(&b)) {
        (Ok(ma), Ok(mb)) => {
            ma.file_type().is_block_device() && mb.file_type().is_block_device() && ma.rdev() == mb.rdev()
        }
        _ => false,
    }
}
