// SPDX-License-Identifier: MIT

use alloc::{boxed::Box, vec::Vec};

use crate::common::errors::*;
use crate::ntfs::constant::*;

/// 65536-entry UTF-16 uppercase table loaded from `$UpCase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upcase {
    table: Box<[u16]>,
}

impl Upcase {
    /// Parses the on-disk table. Short tables are padded with identity.
    pub fn from_bytes(bytes: &[u8]) -> FormatResult<Self> {
        ensure!(!bytes.is_empty() && bytes.len() % 2 == 0, FormatError::Invalid("malformed $UpCase"));
        let mut table: Vec<u16> = bytes
            .chunks_exact(2)
            .take(UPCASE_ENTRIES)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let loaded = table.len();
        table.extend((loaded..UPCASE_ENTRIES).map(|c| c as u16));
        Ok(Self { table: table.into_boxed_slice() })
    }

    /// Default table written by the formatter: ASCII and Latin-1 letters.
    pub fn default_table() -> Self {
        let table: Vec<u16> = (0..UPCASE_ENTRIES)
            .map(|c| match c {
                0x61..=0x7A => (c - 0x20) as u16,
                0xE0..=0xFE if c != 0xF7 => (c - 0x20) as u16,
                0xFF => 0x178,
                _ => c as u16,
            })
            .collect();
        Self { table: table.into_boxed_slice() }
    }

    #[inline]
    pub fn upper(&self, cu: u16) -> u16 {
        self.table[cu as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.table.iter().flat_map(|c| c.to_le_bytes()).collect()
    }
}
