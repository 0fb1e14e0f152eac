// SPDX-License-Identifier: MIT

//! Mapping pairs: the compressed VCN → LCN run encoding of non-resident
//! attributes.

use alloc::vec::Vec;

use crate::common::errors::*;

/// One extent of a non-resident attribute. `lcn == None` is a sparse hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub vcn: u64,
    pub lcn: Option<u64>,
    pub len: u64,
}

impl Run {
    #[inline]
    pub fn end_vcn(&self) -> u64 {
        self.vcn + self.len
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runlist {
    runs: Vec<Run>,
}

impl Runlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes mapping pairs starting at `start_vcn` (the attribute's lowest VCN).
    pub fn decode(bytes: &[u8], start_vcn: u64) -> FormatResult<Self> {
        let mut runs = Vec::new();
        let mut pos = 0usize;
        let mut vcn = start_vcn;
        let mut lcn: i64 = 0;

        while let Some(&header) = bytes.get(pos) {
            if header == 0 {
                return Ok(Self { runs });
            }
            let len_size = (header & 0x0F) as usize;
            let off_size = (header >> 4) as usize;
            pos += 1;

            if len_size == 0 || len_size > 8 || off_size > 8 || pos + len_size + off_size > bytes.len() {
                bail!(FormatError::CorruptRunlist);
            }

            let len = read_signed(&bytes[pos..pos + len_size]);
            if len <= 0 {
                bail!(FormatError::CorruptRunlist);
            }
            pos += len_size;

            let run_lcn = if off_size == 0 {
                None
            } else {
                lcn = lcn
                    .checked_add(read_signed(&bytes[pos..pos + off_size]))
                    .ok_or(FormatError::CorruptRunlist)?;
                if lcn < 0 {
                    bail!(FormatError::CorruptRunlist);
                }
                Some(lcn as u64)
            };
            pos += off_size;

            let next = vcn.checked_add(len as u64).ok_or(FormatError::CorruptRunlist)?;
            if let Some(lcn) = run_lcn {
                ensure!(lcn.checked_add(len as u64).is_some(), FormatError::CorruptRunlist);
            }
            runs.push(Run { vcn, lcn: run_lcn, len: len as u64 });
            vcn = next;
        }

        // Ran off the end without a terminator
        Err(FormatError::CorruptRunlist)
    }

    /// Encodes the runs as mapping pairs, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.runs.len() * 8 + 1);
        let mut prev_lcn: i64 = 0;

        for run in &self.runs {
            let len_bytes = signed_bytes(run.len as i64);
            let delta = run.lcn.map(|lcn| {
                let d = lcn as i64 - prev_lcn;
                prev_lcn = lcn as i64;
                d
            });
            let off_bytes = delta.map_or(0, signed_bytes);

            out.push(((off_bytes as u8) << 4) | len_bytes as u8);
            out.extend_from_slice(&(run.len as i64).to_le_bytes()[..len_bytes]);
            if let Some(d) = delta {
                out.extend_from_slice(&d.to_le_bytes()[..off_bytes]);
            }
        }
        out.push(0);
        out
    }

    /// Appends `len` clusters at `lcn`, merging with the last run when contiguous.
    pub fn push(&mut self, lcn: Option<u64>, len: u64) {
        if len == 0 {
            return;
        }
        let vcn = self.vcn_len();
        if let Some(last) = self.runs.last_mut() {
            let contiguous = match (last.lcn, lcn) {
                (Some(a), Some(b)) => a + last.len == b,
                (None, None) => true,
                _ => false,
            };
            if contiguous {
                last.len += len;
                return;
            }
        }
        self.runs.push(Run { vcn, lcn, len });
    }

    /// LCN backing `vcn`, with the number of clusters left in that run.
    /// `Some((None, n))` is a sparse hole.
    pub fn lookup(&self, vcn: u64) -> Option<(Option<u64>, u64)> {
        let run = self.runs.iter().find(|r| r.vcn <= vcn && vcn < r.end_vcn())?;
        let delta = vcn - run.vcn;
        Some((run.lcn.map(|l| l + delta), run.len - delta))
    }

    /// First LCN past the highest mapped cluster, 0 when nothing is mapped.
    pub fn lcn_end(&self) -> u64 {
        self.runs
            .iter()
            .filter_map(|r| r.lcn.map(|l| l.saturating_add(r.len)))
            .max()
            .unwrap_or(0)
    }

    /// First VCN past the last run.
    pub fn vcn_len(&self) -> u64 {
        self.runs.last().map_or(0, |r| r.end_vcn())
    }

    /// Start VCN of the first run.
    pub fn start_vcn(&self) -> u64 {
        self.runs.first().map_or(0, |r| r.vcn)
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl FromIterator<Run> for Runlist {
    fn from_iter<I: IntoIterator<Item = Run>>(iter: I) -> Self {
        let mut rl = Runlist::new();
        for r in iter {
            rl.push(r.lcn, r.len);
        }
        rl
    }
}

/// Sign-extends a little-endian value of 1..=8 bytes.
fn read_signed(bytes: &[u8]) -> i64 {
    let mut buf = if bytes.last().is_some_and(|b| b & 0x80 != 0) { [0xFFu8; 8] } else { [0u8; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

/// Smallest number of bytes holding `v` as a signed little-endian value.
fn signed_bytes(v: i64) -> usize {
    (1..=8)
        .find(|&n| {
            let bits = n * 8 - 1;
            bits >= 63 || (-(1i64 << bits) <= v && v < (1i64 << bits))
        })
        .unwrap_or(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_decode_simple() {
        // 0x31: 1 length byte, 3 offset bytes. 0x10 clusters at 0x0C0000.
        let raw = [0x31, 0x10, 0x00, 0x00, 0x0C, 0x00];
        let rl = Runlist::decode(&raw, 0).unwrap();
        assert_eq!(rl.runs(), &[Run { vcn: 0, lcn: Some(0x0C0000), len: 0x10 }]);
    }

    #[test]
    fn test_decode_relative_and_sparse() {
        // 8 @ 100, 4 sparse, 2 @ 100 - 50 = 50
        let raw = [0x11, 0x08, 0x64, 0x01, 0x04, 0x11, 0x02, 0xCE, 0x00];
        let rl = Runlist::decode(&raw, 0).unwrap();
        assert_eq!(
            rl.runs(),
            &[
                Run { vcn: 0, lcn: Some(100), len: 8 },
                Run { vcn: 8, lcn: None, len: 4 },
                Run { vcn: 12, lcn: Some(50), len: 2 },
            ]
        );
        assert_eq!(rl.lookup(3), Some((Some(103), 5)));
        assert_eq!(rl.lookup(9), Some((None, 3)));
        assert_eq!(rl.lookup(14), None);
        assert_eq!(rl.vcn_len(), 14);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Runlist::decode(&[0x11, 0x08], 0), Err(FormatError::CorruptRunlist));
        assert_eq!(Runlist::decode(&[0x11, 0x08, 0x64], 0), Err(FormatError::CorruptRunlist));
        // Negative absolute LCN
        assert_eq!(Runlist::decode(&[0x11, 0x01, 0xFF, 0x00], 0), Err(FormatError::CorruptRunlist));
        // Zero-length run
        assert_eq!(Runlist::decode(&[0x11, 0x00, 0x05, 0x00], 0), Err(FormatError::CorruptRunlist));
    }

    #[test]
    fn test_decode_rejects_overflowing_runs() {
        // Three runs of i64::MAX clusters: the VCN passes u64::MAX
        let mut raw = Vec::new();
        for _ in 0..3 {
            raw.push(0x08);
            raw.extend_from_slice(&i64::MAX.to_le_bytes());
        }
        raw.push(0);
        assert_eq!(Runlist::decode(&raw, 0), Err(FormatError::CorruptRunlist));

        // Start VCN near the top of the range
        assert_eq!(Runlist::decode(&[0x01, 0x10, 0x00], u64::MAX - 4), Err(FormatError::CorruptRunlist));

        // One run whose LCN end does not fit
        let mut raw = vec![0x88];
        raw.extend_from_slice(&i64::MAX.to_le_bytes());
        raw.extend_from_slice(&i64::MAX.to_le_bytes());
        raw.push(0);
        let rl = Runlist::decode(&raw, 0).unwrap();
        assert_eq!(rl.lcn_end(), u64::MAX - 1);
    }

    #[test]
    fn test_lcn_end_skips_holes() {
        let raw = [0x11, 0x08, 0x64, 0x01, 0x04, 0x11, 0x02, 0xCE, 0x00];
        assert_eq!(Runlist::decode(&raw, 0).unwrap().lcn_end(), 108);
        assert_eq!(Runlist::new().lcn_end(), 0);
    }

    #[test]
    fn test_encode_uses_minimal_fields() {
        let rl: Runlist = vec![
            Run { vcn: 0, lcn: Some(100), len: 8 },
            Run { vcn: 8, lcn: None, len: 4 },
            Run { vcn: 12, lcn: Some(50), len: 2 },
        ]
        .into_iter()
        .collect();
        assert_eq!(rl.encode(), vec![0x11, 0x08, 0x64, 0x01, 0x04, 0x11, 0x02, 0xCE, 0x00]);
    }

    #[test]
    fn test_encode_large_values() {
        let mut rl = Runlist::new();
        rl.push(Some(0x1_0000_0000), 200);
        rl.push(Some(5), 1);
        let decoded = Runlist::decode(&rl.encode(), 0).unwrap();
        assert_eq!(decoded, rl);
        // 200 needs two bytes signed
        assert_eq!(rl.encode()[0], 0x52);
    }

    #[test]
    fn test_push_merges_contiguous() {
        let mut rl = Runlist::new();
        rl.push(Some(10), 4);
        rl.push(Some(14), 2);
        rl.push(Some(20), 1);
        rl.push(None, 0);
        assert_eq!(
            rl.runs(),
            &[Run { vcn: 0, lcn: Some(10), len: 6 }, Run { vcn: 6, lcn: Some(20), len: 1 }]
        );
    }
}
