// SPDX-License-Identifier: MIT

//! Zone-based cluster allocator over `$Bitmap`.
//!
//! The volume is split in three zones: the MFT zone starting at `mft_lcn`,
//! and two data zones made of the clusters outside it, cut at the point
//! where half of them lie on either side. Each zone keeps a scan position so
//! consecutive allocations continue where the last one stopped.

use alloc::vec::Vec;
use core::ops::Range;

use log::{debug, trace};

use crate::common::{bitmap::BitmapOps, errors::*};
use crate::ntfs::{
    constant::*,
    volume::{Volume, device_of},
};

/// Contiguous clusters `[lcn, lcn + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterRun {
    pub lcn: u64,
    pub len: u64,
}

impl ClusterRun {
    #[inline]
    pub const fn new(lcn: u64, len: u64) -> Self {
        Self { lcn, len }
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.lcn + self.len
    }
}

/// Which zone an allocation prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZoneHint {
    #[default]
    Data,
    Mft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Mft,
    Data1,
    Data2,
}

impl ZoneHint {
    const fn order(self) -> [Zone; 3] {
        match self {
            ZoneHint::Mft => [Zone::Mft, Zone::Data1, Zone::Data2],
            ZoneHint::Data => [Zone::Data1, Zone::Data2, Zone::Mft],
        }
    }
}

/// Zone boundaries and scan positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zones {
    pub nr_clusters: u64,
    pub mft_zone_multiplier: u8,
    pub mft_zone_start: u64,
    pub mft_zone_end: u64,
    /// Boundary between the two data zones.
    pub data_split: u64,
    pub mft_zone_pos: u64,
    pub data1_zone_pos: u64,
    pub data2_zone_pos: u64,
}

impl Zones {
    /// Lays out the zones for a volume of `nr_clusters` and puts every scan
    /// position on the first free cluster of its zone (zone start when full).
    pub fn compute(nr_clusters: u64, mft_lcn: u64, multiplier: u8, bits: &[u8]) -> NtfsResult<Self> {
        ensure!(
            (1..=MAX_MFT_ZONE_MULTIPLIER).contains(&multiplier),
            NtfsError::InvalidState("mft zone multiplier out of range")
        );
        let start = mft_lcn.min(nr_clusters);
        let end = start.saturating_add(nr_clusters / multiplier as u64).min(nr_clusters);

        let outside = nr_clusters - (end - start);
        let half = outside / 2;
        let data_split = if half <= start { half } else { end + (half - start) };

        let mut zones = Self {
            nr_clusters,
            mft_zone_multiplier: multiplier,
            mft_zone_start: start,
            mft_zone_end: end,
            data_split,
            ..Self::default()
        };
        for zone in [Zone::Mft, Zone::Data1, Zone::Data2] {
            let segs = zones.segments(zone);
            // An empty zone keeps its position on its own start
            let pos = segs.iter().find(|s| !s.is_empty()).unwrap_or(&segs[0]).start;
            let free = segs
                .iter()
                .find_map(|s| bits.find_first_zero_in(s.start as usize, s.end as usize));
            *zones.pos_mut(zone) = free.map_or(pos, |b| b as u64);
        }
        Ok(zones)
    }

    #[inline]
    pub fn mft_zone(&self) -> Range<u64> {
        self.mft_zone_start..self.mft_zone_end
    }

    /// Clusters of the zone in ascending order; either part may be empty.
    fn segments(&self, zone: Zone) -> [Range<u64>; 2] {
        let (ms, me, split, nr) = (self.mft_zone_start, self.mft_zone_end, self.data_split, self.nr_clusters);
        match zone {
            Zone::Mft => [ms..me, me..me],
            Zone::Data1 if split <= ms => [0..split, split..split],
            Zone::Data1 => [0..ms, me..split.max(me)],
            Zone::Data2 if split <= ms => [split..ms, me..nr],
            Zone::Data2 => [split.max(me)..nr, nr..nr],
        }
    }

    fn pos_mut(&mut self, zone: Zone) -> &mut u64 {
        match zone {
            Zone::Mft => &mut self.mft_zone_pos,
            Zone::Data1 => &mut self.data1_zone_pos,
            Zone::Data2 => &mut self.data2_zone_pos,
        }
    }

    /// Ranges of `zone` in scan order: from the position to the end of the
    /// zone, then from the start of the zone back up to the position.
    fn scan_order(&self, zone: Zone, pos: u64) -> impl Iterator<Item = Range<u64>> {
        let segs = self.segments(zone);
        let tail = segs.clone().into_iter().map(move |s| s.start.max(pos)..s.end);
        let head = segs.into_iter().map(move |s| s.start..s.end.min(pos));
        tail.chain(head).filter(|r| r.start < r.end)
    }

    /// Picks `count` free clusters following the zone order of `hint` and
    /// advances the positions past them. Returns fewer clusters only if the
    /// bitmap does not hold `count` free ones.
    pub fn scan(&mut self, bits: &[u8], count: u64, hint: ZoneHint) -> Vec<ClusterRun> {
        let mut runs: Vec<ClusterRun> = Vec::new();
        let mut left = count;

        for zone in hint.order() {
            if left == 0 {
                break;
            }
            let pos = *self.pos_mut(zone);
            let mut last_end = None;
            for range in self.scan_order(zone, pos) {
                let mut cur = range.start;
                while left > 0 && cur < range.end {
                    let Some(free) = bits.find_first_zero_in(cur as usize, range.end as usize) else {
                        break;
                    };
                    let free = free as u64;
                    let len = (bits.zero_run_len(free as usize, range.end as usize) as u64).min(left);
                    trace!("{zone:?} zone: run {free}+{len}");
                    match runs.last_mut() {
                        Some(last) if last.end() == free => last.len += len,
                        _ => runs.push(ClusterRun::new(free, len)),
                    }
                    left -= len;
                    cur = free + len;
                    last_end = Some(cur);
                }
                if left == 0 {
                    break;
                }
            }
            if let Some(end) = last_end {
                *self.pos_mut(zone) = end;
            }
        }
        runs
    }
}

impl Volume {
    /// Allocates `count` clusters, preferring the zone named by `hint`.
    ///
    /// All or nothing: when fewer than `count` clusters are free the bitmap
    /// is left untouched and `NoSpace` is returned. The new bits are written
    /// through to `$Bitmap`; a failed write restores them.
    pub fn allocate_clusters(&mut self, count: u64, hint: ZoneHint) -> NtfsResult<Vec<ClusterRun>> {
        self.ensure_ready()?;
        self.ensure_writable()?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let nr = self.geometry.nr_clusters;
        let bitmap = self
            .lcn_bitmap
            .as_mut()
            .ok_or(NtfsError::InvalidState("$Bitmap not loaded"))?;
        let free = nr - bitmap.count_ones(0, nr);
        if free < count {
            debug!("cluster allocation of {count} refused: {free} free");
            return Err(AllocError::NoSpace.into());
        }

        let mut zones = self.zones;
        let runs = zones.scan(bitmap.as_bytes(), count, hint);
        let ranges: Vec<(u64, u64)> = runs.iter().map(|r| (r.lcn, r.len)).collect();
        let io = device_of(&mut self.device)?;
        bitmap.update(io, &ranges, true)?;
        self.zones = zones;

        debug!("allocated {count} clusters in {} run(s), {hint:?} zone first", runs.len());
        Ok(runs)
    }

    /// Returns `runs` to the free pool. Every cluster must be inside the
    /// volume and currently allocated; nothing is changed otherwise. Zone
    /// positions stay where they are.
    pub fn free_clusters(&mut self, runs: &[ClusterRun]) -> NtfsResult {
        self.ensure_ready()?;
        self.ensure_writable()?;
        let nr = self.geometry.nr_clusters;
        let bitmap = self
            .lcn_bitmap
            .as_mut()
            .ok_or(NtfsError::InvalidState("$Bitmap not loaded"))?;

        for run in runs {
            let end = run.lcn.checked_add(run.len).filter(|&e| e <= nr);
            let valid = end.is_some_and(|e| bitmap.all_set(run.lcn, e));
            ensure!(valid, AllocError::InvalidRun { lcn: run.lcn, len: run.len });
        }

        let ranges: Vec<(u64, u64)> = runs.iter().map(|r| (r.lcn, r.len)).collect();
        let io = device_of(&mut self.device)?;
        bitmap.update(io, &ranges, false)?;
        debug!("freed {} run(s)", runs.len());
        Ok(())
    }

    /// Clusters not marked in `$Bitmap`.
    pub fn free_cluster_count(&self) -> u64 {
        let nr = self.geometry.nr_clusters;
        self.lcn_bitmap
            .as_ref()
            .map_or(0, |b| nr - b.count_ones(0, nr))
    }

    pub fn is_cluster_allocated(&self, lcn: u64) -> bool {
        lcn < self.geometry.nr_clusters && self.lcn_bitmap.as_ref().is_some_and(|b| b.get(lcn))
    }

    #[inline]
    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub(crate) fn init_zones(&mut self) -> NtfsResult {
        let bitmap = self
            .lcn_bitmap
            .as_ref()
            .ok_or(NtfsError::InvalidState("$Bitmap not loaded"))?;
        let g = &self.geometry;
        self.zones = Zones::compute(g.nr_clusters, g.mft_lcn, self.zones.mft_zone_multiplier, bitmap.as_bytes())?;
        debug!(
            "zones: mft {:?}, data split at {}, positions {}/{}/{}",
            self.zones.mft_zone(),
            self.zones.data_split,
            self.zones.mft_zone_pos,
            self.zones.data1_zone_pos,
            self.zones.data2_zone_pos
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn bits(nr: usize, used: &[Range<usize>]) -> Vec<u8> {
        let mut b = vec![0u8; nr.div_ceil(8)];
        for r in used {
            b.set_range(r.start, r.end, true);
        }
        b
    }

    #[test]
    fn test_zone_layout_split_after_mft_zone() {
        let b = bits(1000, &[0..102]);
        let z = Zones::compute(1000, 102, 2, &b).unwrap();
        assert_eq!(z.mft_zone(), 102..602);
        assert_eq!(z.data_split, 750);
        assert_eq!(z.mft_zone_pos, 102);
        assert_eq!(z.data1_zone_pos, 602);
        assert_eq!(z.data2_zone_pos, 750);
    }

    #[test]
    fn test_zone_layout_split_before_mft_zone() {
        // MFT near the middle: half of the outside clusters fit before it
        let b = bits(1000, &[]);
        let z = Zones::compute(1000, 600, 8, &b).unwrap();
        assert_eq!(z.mft_zone(), 600..725);
        assert_eq!(z.data_split, 437);
        assert_eq!(z.segments(Zone::Data1), [0..437, 437..437]);
        assert_eq!(z.segments(Zone::Data2), [437..600, 725..1000]);
    }

    #[test]
    fn test_zone_clipped_to_volume() {
        let b = bits(100, &[]);
        let z = Zones::compute(100, 95, 1, &b).unwrap();
        assert_eq!(z.mft_zone(), 95..100);
        assert!(Zones::compute(100, 0, 0, &b).is_err());
        assert!(Zones::compute(100, 0, 9, &b).is_err());
    }

    #[test]
    fn test_empty_mft_zone_keeps_position_at_start() {
        // 7 / 8 rounds the zone down to nothing
        let z = Zones::compute(7, 3, 8, &[0]).unwrap();
        assert_eq!(z.mft_zone(), 3..3);
        assert_eq!(z.mft_zone_pos, 3);
        assert!(z.mft_zone_start <= z.mft_zone_pos && z.mft_zone_pos <= z.mft_zone_end);

        let mut z = z;
        let runs = z.scan(&[0], 2, ZoneHint::Mft);
        assert_eq!(runs.iter().map(|r| r.len).sum::<u64>(), 2);
        assert_eq!(z.mft_zone_pos, 3);
    }

    #[test]
    fn test_scan_data_hint_skips_mft_zone() {
        let b = bits(1000, &[0..102]);
        let mut z = Zones::compute(1000, 102, 2, &b).unwrap();
        let runs = z.scan(&b, 10, ZoneHint::Data);
        assert_eq!(runs, vec![ClusterRun::new(602, 10)]);
        assert_eq!(z.data1_zone_pos, 612);
        let runs = z.scan(&b, 5, ZoneHint::Mft);
        assert_eq!(runs, vec![ClusterRun::new(102, 5)]);
        assert_eq!(z.mft_zone_pos, 107);
    }

    #[test]
    fn test_scan_wraps_inside_zone() {
        let b = bits(64, &[10..60]);
        let mut z = Zones { nr_clusters: 64, mft_zone_start: 0, mft_zone_end: 0, data_split: 64, data1_zone_pos: 60, ..Zones::default() };
        let runs = z.scan(&b, 6, ZoneHint::Data);
        assert_eq!(runs, vec![ClusterRun::new(60, 4), ClusterRun::new(0, 2)]);
        assert_eq!(z.data1_zone_pos, 2);
    }

    #[test]
    fn test_scan_spills_into_next_zone() {
        let b = bits(1000, &[0..102, 602..750]);
        let mut z = Zones::compute(1000, 102, 2, &b).unwrap();
        let runs = z.scan(&b, 300, ZoneHint::Data);
        // data1 is full, data2 has 250 clusters, the MFT zone gives the rest
        assert_eq!(runs, vec![ClusterRun::new(750, 250), ClusterRun::new(102, 50)]);
    }
}
