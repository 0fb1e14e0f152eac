// SPDX-License-Identifier: MIT

use alloc::{boxed::Box, string::String, vec::Vec};

use crate::common::errors::*;
use crate::ntfs::{constant::*, utils::*};

/// Flags of an `$AttrDef` entry.
pub const ATTR_DEF_INDEXABLE: u32 = 0x02;
pub const ATTR_DEF_RESIDENT_ONLY: u32 = 0x40;
pub const ATTR_DEF_NON_RESIDENT_ONLY: u32 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDefEntry {
    pub name: String,
    pub attr_type: u32,
    pub flags: u32,
    pub min_size: i64,
    pub max_size: i64,
}

/// Raw `$AttrDef` table with typed lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDef {
    blob: Box<[u8]>,
}

impl AttrDef {
    pub fn from_bytes(bytes: Vec<u8>) -> FormatResult<Self> {
        ensure!(bytes.len() >= ATTRDEF_ENTRY_SIZE, FormatError::Invalid("malformed $AttrDef"));
        Ok(Self { blob: bytes.into_boxed_slice() })
    }

    /// Blob length in bytes.
    #[inline] pub fn len(&self) -> usize { self.blob.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.blob.is_empty() }
    #[inline] pub fn as_bytes(&self) -> &[u8] { &self.blob }

    /// Entries up to the first zero type.
    pub fn entries(&self) -> impl Iterator<Item = AttrDefEntry> + '_ {
        self.blob
            .chunks_exact(ATTRDEF_ENTRY_SIZE)
            .map(parse_entry)
            .take_while(|e| e.attr_type != 0)
    }

    pub fn find(&self, attr_type: u32) -> Option<AttrDefEntry> {
        self.entries().find(|e| e.attr_type == attr_type)
    }

    /// Table written by the formatter.
    pub fn default_table() -> Vec<u8> {
        const DEFS: &[(&str, u32, u32, i64, i64)] = &[
            ("$STANDARD_INFORMATION", AT_STANDARD_INFORMATION, ATTR_DEF_RESIDENT_ONLY, 48, 72),
            ("$ATTRIBUTE_LIST", AT_ATTRIBUTE_LIST, ATTR_DEF_NON_RESIDENT_ONLY, 0, -1),
            ("$FILE_NAME", AT_FILE_NAME, ATTR_DEF_INDEXABLE | ATTR_DEF_RESIDENT_ONLY, 68, 578),
            ("$OBJECT_ID", AT_OBJECT_ID, ATTR_DEF_RESIDENT_ONLY, 0, 256),
            ("$SECURITY_DESCRIPTOR", AT_SECURITY_DESCRIPTOR, ATTR_DEF_NON_RESIDENT_ONLY, 0, -1),
            ("$VOLUME_NAME", AT_VOLUME_NAME, ATTR_DEF_RESIDENT_ONLY, 2, 256),
            ("$VOLUME_INFORMATION", AT_VOLUME_INFORMATION, ATTR_DEF_RESIDENT_ONLY, 12, 12),
            ("$DATA", AT_DATA, 0, 0, -1),
            ("$INDEX_ROOT", AT_INDEX_ROOT, ATTR_DEF_RESIDENT_ONLY, 0, -1),
            ("$INDEX_ALLOCATION", AT_INDEX_ALLOCATION, ATTR_DEF_NON_RESIDENT_ONLY, 0, -1),
            ("$BITMAP", AT_BITMAP, 0, 0, -1),
        ];
        // Terminating zero entry included
        let mut out = alloc::vec![0u8; (DEFS.len() + 1) * ATTRDEF_ENTRY_SIZE];
        for (i, &(name, ty, flags, min, max)) in DEFS.iter().enumerate() {
            let e = &mut out[i * ATTRDEF_ENTRY_SIZE..(i + 1) * ATTRDEF_ENTRY_SIZE];
            for (j, cu) in name.encode_utf16().take(64).enumerate() {
                put_u16(e, j * 2, cu);
            }
            put_u32(e, 128, ty);
            put_u32(e, 140, flags);
            put_u64(e, 144, min as u64);
            put_u64(e, 152, max as u64);
        }
        out
    }
}

fn parse_entry(e: &[u8]) -> AttrDefEntry {
    let name_len = e[..128]
        .chunks_exact(2)
        .position(|c| c[0] == 0 && c[1] == 0)
        .unwrap_or(64);
    AttrDefEntry {
        name: utf16le_to_string(&e[..name_len * 2]),
        attr_type: get_u32(e, 128),
        flags: get_u32(e, 140),
        min_size: get_u64(e, 144) as i64,
        max_size: get_u64(e, 152) as i64,
    }
}
