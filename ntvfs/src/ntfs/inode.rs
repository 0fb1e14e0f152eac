// SPDX-License-Identifier: MIT

//! MFT file records: update-sequence protection, attribute lookup and the
//! in-place edits the volume core needs (mapping pairs, resident values).

use alloc::{vec, vec::Vec};

use crate::common::errors::*;
use crate::ntfs::{constant::*, runlist::Runlist, utils::*};

/// Location of one attribute inside a record buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub offset: usize,
    pub attr_type: u32,
    pub length: usize,
    pub non_resident: bool,
    pub name_length: u8,
}

/// Allocated / data / initialized sizes of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttrSizes {
    pub allocated: u64,
    pub data: u64,
    pub initialized: u64,
}

impl AttrSizes {
    /// Fully initialized value of `data` bytes in `allocated` bytes.
    #[inline]
    pub fn filled(allocated: u64, data: u64) -> Self {
        Self { allocated, data, initialized: data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonResident {
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub sizes: AttrSizes,
    pub runlist: Runlist,
}

/// One MFT record with its fixups removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MftRecord {
    number: u64,
    data: Vec<u8>,
}

impl MftRecord {
    /// Blank record: header, update sequence array and end marker only.
    pub fn new(number: u64, record_size: usize, sequence: u16, flags: u16) -> Self {
        let mut data = vec![0u8; record_size];
        let usa_count = (record_size / NTFS_BLOCK_SIZE + 1) as u16;
        let attrs_offset = align8(MFT_HDR_SIZE + 2 * usa_count as usize);

        data[..4].copy_from_slice(MFT_RECORD_MAGIC);
        put_u16(&mut data, MFT_HDR_USA_OFS, MFT_HDR_SIZE as u16);
        put_u16(&mut data, MFT_HDR_USA_COUNT, usa_count);
        put_u16(&mut data, MFT_HDR_SEQUENCE, sequence);
        put_u16(&mut data, MFT_HDR_LINK_COUNT, if flags & MFT_RECORD_IN_USE != 0 { 1 } else { 0 });
        put_u16(&mut data, MFT_HDR_ATTRS_OFFSET, attrs_offset as u16);
        put_u16(&mut data, MFT_HDR_FLAGS, flags);
        put_u32(&mut data, MFT_HDR_BYTES_IN_USE, (attrs_offset + 8) as u32);
        put_u32(&mut data, MFT_HDR_BYTES_ALLOCATED, record_size as u32);
        put_u32(&mut data, MFT_HDR_RECORD_NUMBER, number as u32);
        // Update sequence number starts at 1
        put_u16(&mut data, MFT_HDR_SIZE, 1);
        put_u32(&mut data, attrs_offset, AT_END);

        Self { number, data }
    }

    /// Parses a record read from disk, undoing the update sequence protection.
    pub fn from_disk(number: u64, mut raw: Vec<u8>) -> FormatResult<Self> {
        ensure!(raw.len() >= NTFS_BLOCK_SIZE, FormatError::CorruptRecord(number));
        ensure!(&raw[..4] == MFT_RECORD_MAGIC, FormatError::BadRecordMagic(number));

        let usa_ofs = get_u16(&raw, MFT_HDR_USA_OFS) as usize;
        let usa_count = get_u16(&raw, MFT_HDR_USA_COUNT) as usize;
        ensure!(
            usa_count == raw.len() / NTFS_BLOCK_SIZE + 1
                && usa_ofs % 2 == 0
                && usa_ofs + 2 * usa_count <= NTFS_BLOCK_SIZE - 2,
            FormatError::CorruptRecord(number)
        );

        let usn = get_u16(&raw, usa_ofs);
        for i in 1..usa_count {
            let tail = i * NTFS_BLOCK_SIZE - 2;
            ensure!(get_u16(&raw, tail) == usn, FormatError::FixupMismatch(number));
            let saved = get_u16(&raw, usa_ofs + 2 * i);
            put_u16(&mut raw, tail, saved);
        }

        let rec = Self { number, data: raw };
        let attrs_offset = rec.attrs_offset();
        let in_use = rec.bytes_in_use();
        ensure!(
            attrs_offset >= usa_ofs + 2 * usa_count
                && attrs_offset + 8 <= in_use
                && in_use <= rec.data.len(),
            FormatError::CorruptRecord(number)
        );
        Ok(rec)
    }

    /// Applies the update sequence protection, bumping the sequence number.
    pub fn to_disk(&mut self) -> Vec<u8> {
        let usa_ofs = get_u16(&self.data, MFT_HDR_USA_OFS) as usize;
        let usa_count = get_u16(&self.data, MFT_HDR_USA_COUNT) as usize;

        let mut usn = get_u16(&self.data, usa_ofs).wrapping_add(1);
        if usn == 0 || usn == 0xFFFF {
            usn = 1;
        }
        put_u16(&mut self.data, usa_ofs, usn);
        for i in 1..usa_count {
            let saved = get_u16(&self.data, i * NTFS_BLOCK_SIZE - 2);
            put_u16(&mut self.data, usa_ofs + 2 * i, saved);
        }

        let mut out = self.data.clone();
        for i in 1..usa_count {
            put_u16(&mut out, i * NTFS_BLOCK_SIZE - 2, usn);
        }
        out
    }

    #[inline] pub fn number(&self) -> u64 { self.number }
    #[inline] pub fn as_bytes(&self) -> &[u8] { &self.data }
    #[inline] pub fn size(&self) -> usize { self.data.len() }

    #[inline] pub fn sequence_number(&self) -> u16 { get_u16(&self.data, MFT_HDR_SEQUENCE) }
    #[inline] pub fn set_sequence_number(&mut self, seq: u16) { put_u16(&mut self.data, MFT_HDR_SEQUENCE, seq) }

    #[inline] pub fn flags(&self) -> u16 { get_u16(&self.data, MFT_HDR_FLAGS) }
    #[inline] pub fn set_flags(&mut self, flags: u16) { put_u16(&mut self.data, MFT_HDR_FLAGS, flags) }
    #[inline] pub fn is_in_use(&self) -> bool { self.flags() & MFT_RECORD_IN_USE != 0 }

    #[inline] fn attrs_offset(&self) -> usize { get_u16(&self.data, MFT_HDR_ATTRS_OFFSET) as usize }
    #[inline] fn bytes_in_use(&self) -> usize { get_u32(&self.data, MFT_HDR_BYTES_IN_USE) as usize }

    /// Walks the attribute headers up to the end marker.
    pub fn attributes(&self) -> FormatResult<Vec<Attr>> {
        let mut out = Vec::new();
        let in_use = self.bytes_in_use();
        let mut pos = self.attrs_offset();

        loop {
            ensure!(pos + 4 <= in_use, FormatError::CorruptRecord(self.number));
            let attr_type = get_u32(&self.data, pos);
            if attr_type == AT_END {
                return Ok(out);
            }
            let length = get_u32(&self.data, pos + 4) as usize;
            ensure!(
                length >= ATTR_HDR_RESIDENT_SIZE && length % 8 == 0 && pos + length <= in_use,
                FormatError::CorruptRecord(self.number)
            );
            out.push(Attr {
                offset: pos,
                attr_type,
                length,
                non_resident: self.data[pos + 8] != 0,
                name_length: self.data[pos + 9],
            });
            pos += length;
        }
    }

    /// First unnamed attribute of `attr_type`.
    pub fn find(&self, attr_type: u32) -> FormatResult<Option<Attr>> {
        Ok(self
            .attributes()?
            .into_iter()
            .find(|a| a.attr_type == attr_type && a.name_length == 0))
    }

    /// Like [`find`](Self::find), failing when the attribute is absent.
    pub fn require(&self, attr_type: u32) -> FormatResult<Attr> {
        let attrs = self.attributes()?;
        if let Some(a) = attrs.iter().find(|a| a.attr_type == attr_type && a.name_length == 0) {
            return Ok(*a);
        }
        if attrs.iter().any(|a| a.attr_type == AT_ATTRIBUTE_LIST) {
            return Err(FormatError::AttributeListUnsupported(self.number));
        }
        Err(FormatError::MissingAttribute { record: self.number, attr_type })
    }

    fn value_range(&self, attr: &Attr) -> FormatResult<(usize, usize)> {
        ensure!(!attr.non_resident, FormatError::CorruptRecord(self.number));
        let len = get_u32(&self.data, attr.offset + 16) as usize;
        let off = get_u16(&self.data, attr.offset + 20) as usize;
        ensure!(off + len <= attr.length, FormatError::CorruptRecord(self.number));
        Ok((attr.offset + off, attr.offset + off + len))
    }

    pub fn resident_value(&self, attr: &Attr) -> FormatResult<&[u8]> {
        let (start, end) = self.value_range(attr)?;
        Ok(&self.data[start..end])
    }

    pub fn resident_value_mut(&mut self, attr: &Attr) -> FormatResult<&mut [u8]> {
        let (start, end) = self.value_range(attr)?;
        Ok(&mut self.data[start..end])
    }

    pub fn non_resident(&self, attr: &Attr) -> FormatResult<NonResident> {
        ensure!(attr.non_resident, FormatError::CorruptRecord(self.number));
        ensure!(attr.length >= ATTR_HDR_NON_RESIDENT_SIZE, FormatError::CorruptRecord(self.number));
        let base = attr.offset;
        let mp_off = get_u16(&self.data, base + 32) as usize;
        ensure!(
            mp_off >= ATTR_HDR_NON_RESIDENT_SIZE && mp_off < attr.length,
            FormatError::CorruptRecord(self.number)
        );
        let lowest_vcn = get_u64(&self.data, base + 16);
        let runlist = Runlist::decode(&self.data[base + mp_off..base + attr.length], lowest_vcn)?;
        Ok(NonResident {
            lowest_vcn,
            highest_vcn: get_u64(&self.data, base + 24),
            sizes: AttrSizes {
                allocated: get_u64(&self.data, base + 40),
                data: get_u64(&self.data, base + 48),
                initialized: get_u64(&self.data, base + 56),
            },
            runlist,
        })
    }

    /// Rewrites the mapping pairs and sizes of a non-resident attribute,
    /// shifting the attributes that follow. Fails with `NoSpace` when the
    /// record cannot hold the new mapping pairs.
    pub fn update_non_resident(
        &mut self,
        attr_type: u32,
        runlist: &Runlist,
        sizes: AttrSizes,
    ) -> NtfsResult {
        let attr = self.require(attr_type)?;
        ensure!(attr.non_resident, FormatError::CorruptRecord(self.number));
        let base = attr.offset;
        let mp_off = get_u16(&self.data, base + 32) as usize;
        let mp = runlist.encode();
        let new_len = align8(mp_off + mp.len());

        let in_use = self.bytes_in_use();
        let new_in_use = in_use - attr.length + new_len;
        ensure!(new_in_use <= self.data.len(), NtfsError::NoSpace);

        self.data.copy_within(base + attr.length..in_use, base + new_len);
        if new_in_use < in_use {
            self.data[new_in_use..in_use].fill(0);
        }
        self.data[base + mp_off..base + new_len].fill(0);
        self.data[base + mp_off..base + mp_off + mp.len()].copy_from_slice(&mp);

        put_u32(&mut self.data, base + 4, new_len as u32);
        put_u64(&mut self.data, base + 24, runlist.vcn_len().wrapping_sub(1));
        put_u64(&mut self.data, base + 40, sizes.allocated);
        put_u64(&mut self.data, base + 48, sizes.data);
        put_u64(&mut self.data, base + 56, sizes.initialized);
        put_u32(&mut self.data, MFT_HDR_BYTES_IN_USE, new_in_use as u32);
        Ok(())
    }

    /// Adds an unnamed resident attribute, keeping attributes sorted by type.
    pub fn add_resident(&mut self, attr_type: u32, value: &[u8]) -> NtfsResult {
        let len = align8(ATTR_HDR_RESIDENT_SIZE + value.len());
        let mut buf = vec![0u8; len];
        put_u32(&mut buf, 0, attr_type);
        put_u32(&mut buf, 4, len as u32);
        put_u16(&mut buf, 10, ATTR_HDR_RESIDENT_SIZE as u16);
        put_u32(&mut buf, 16, value.len() as u32);
        put_u16(&mut buf, 20, ATTR_HDR_RESIDENT_SIZE as u16);
        buf[ATTR_HDR_RESIDENT_SIZE..ATTR_HDR_RESIDENT_SIZE + value.len()].copy_from_slice(value);
        self.insert_attr(attr_type, buf)
    }

    /// Adds an unnamed non-resident attribute starting at VCN 0.
    pub fn add_non_resident(&mut self, attr_type: u32, runlist: &Runlist, sizes: AttrSizes) -> NtfsResult {
        let mp = runlist.encode();
        let len = align8(ATTR_HDR_NON_RESIDENT_SIZE + mp.len());
        let mut buf = vec![0u8; len];
        put_u32(&mut buf, 0, attr_type);
        put_u32(&mut buf, 4, len as u32);
        buf[8] = 1;
        put_u16(&mut buf, 10, ATTR_HDR_NON_RESIDENT_SIZE as u16);
        put_u64(&mut buf, 24, runlist.vcn_len().wrapping_sub(1));
        put_u16(&mut buf, 32, ATTR_HDR_NON_RESIDENT_SIZE as u16);
        put_u64(&mut buf, 40, sizes.allocated);
        put_u64(&mut buf, 48, sizes.data);
        put_u64(&mut buf, 56, sizes.initialized);
        buf[ATTR_HDR_NON_RESIDENT_SIZE..ATTR_HDR_NON_RESIDENT_SIZE + mp.len()].copy_from_slice(&mp);
        self.insert_attr(attr_type, buf)
    }

    fn insert_attr(&mut self, attr_type: u32, mut attr: Vec<u8>) -> NtfsResult {
        let attrs = self.attributes()?;
        let in_use = self.bytes_in_use();
        let new_in_use = in_use + attr.len();
        ensure!(new_in_use <= self.data.len(), NtfsError::NoSpace);

        // Before the first attribute of a higher type, else before the end marker
        let at = attrs
            .iter()
            .find(|a| a.attr_type > attr_type)
            .map_or_else(|| attrs.last().map_or(self.attrs_offset(), |a| a.offset + a.length), |a| a.offset);

        let instance = get_u16(&self.data, MFT_HDR_NEXT_INSTANCE);
        put_u16(&mut attr, 14, instance);
        put_u16(&mut self.data, MFT_HDR_NEXT_INSTANCE, instance.wrapping_add(1));

        self.data.copy_within(at..in_use, at + attr.len());
        self.data[at..at + attr.len()].copy_from_slice(&attr);
        put_u32(&mut self.data, MFT_HDR_BYTES_IN_USE, new_in_use as u32);
        Ok(())
    }
}
