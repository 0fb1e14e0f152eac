// SPDX-License-Identifier: MIT

//! Little-endian field access on raw record buffers.
//!
//! Reads past the end of the buffer yield zero and writes past it are
//! dropped; callers validate offsets against record headers first.

use alloc::string::String;

#[inline]
pub fn get_u16(buf: &[u8], off: usize) -> u16 {
    buf.get(off..off + 2)
        .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
pub fn get_u32(buf: &[u8], off: usize) -> u32 {
    buf.get(off..off + 4)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
pub fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    if let Some(b) = buf.get(off..off + 8) {
        raw.copy_from_slice(b);
    }
    u64::from_le_bytes(raw)
}

#[inline]
pub fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    if let Some(b) = buf.get_mut(off..off + 2) {
        b.copy_from_slice(&v.to_le_bytes());
    }
}

#[inline]
pub fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    if let Some(b) = buf.get_mut(off..off + 4) {
        b.copy_from_slice(&v.to_le_bytes());
    }
}

#[inline]
pub fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    if let Some(b) = buf.get_mut(off..off + 8) {
        b.copy_from_slice(&v.to_le_bytes());
    }
}

#[inline]
pub const fn align8(v: usize) -> usize {
    (v + 7) & !7
}

/// Decodes UTF-16LE bytes, replacing invalid sequences.
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
