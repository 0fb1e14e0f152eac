// SPDX-License-Identifier: MIT

//! MFT record allocator: `$MFT:$BITMAP` search, `$MFT` growth and record
//! release.

use alloc::vec::Vec;

use log::{debug, warn};
use ntvio::DeviceIOExt;

use crate::common::errors::*;
use crate::ntfs::{
    cluster::{ClusterRun, ZoneHint},
    constant::*,
    inode::{AttrSizes, MftRecord},
    utils::*,
    volume::{Volume, device_of},
};

impl Volume {
    /// Record slots currently backed by `$MFT:$DATA`.
    pub fn mft_records(&self) -> u64 {
        let rs = self.geometry.mft_record_size as u64;
        self.mft_data.as_ref().map_or(0, |d| d.len() / rs)
    }

    /// Slots the allocator can still hand out without growing `$MFT`.
    pub fn free_mft_records(&self) -> u64 {
        let records = self.mft_records();
        let start = FIRST_USER_RECORD.min(records);
        self.mft_bitmap
            .as_ref()
            .map_or(0, |b| (records - start) - b.count_ones(start, records))
    }

    pub fn is_record_in_use(&self, number: u64) -> bool {
        number < self.mft_records() && self.mft_bitmap.as_ref().is_some_and(|b| b.get(number))
    }

    /// Claims a free record and writes it out as an empty in-use `FILE`
    /// record. `$MFT` is grown once when no slot is free.
    pub fn allocate_record(&mut self) -> NtfsResult<MftRecord> {
        self.ensure_ready()?;
        self.ensure_writable()?;

        let number = match self.find_free_record() {
            Some(n) => n,
            None => {
                self.grow_mft()?;
                self.find_free_record().ok_or(NtfsError::NoSpace)?
            }
        };

        let sequence = self.slot_sequence(number)?;
        let rs = self.geometry.mft_record_size as usize;
        let mut rec = MftRecord::new(number, rs, sequence, MFT_RECORD_IN_USE);

        self.set_record_bit(number, true)?;
        if let Err(e) = self.write_mft_record(&mut rec) {
            if let Err(e2) = self.set_record_bit(number, false) {
                warn!("could not release MFT record {number} after failed write: {e2}");
            }
            return Err(e);
        }
        self.mft_data_pos = number + 1;
        debug!("allocated MFT record {number} (sequence {sequence})");
        Ok(rec)
    }

    /// Releases a user record: clears its in-use flag, bumps its sequence
    /// number and clears its bitmap bit. Reserved records, numbers past the
    /// end of `$MFT` and records not in use are refused.
    pub fn free_record(&mut self, number: u64) -> NtfsResult {
        self.ensure_ready()?;
        self.ensure_writable()?;
        ensure!(
            number >= FIRST_USER_RECORD && self.is_record_in_use(number),
            AllocError::InvalidRecord(number)
        );

        let mut rec = self.read_mft_record(number)?;
        rec.set_flags(rec.flags() & !MFT_RECORD_IN_USE);
        let sequence = match rec.sequence_number().wrapping_add(1) {
            0 => 1,
            s => s,
        };
        rec.set_sequence_number(sequence);
        self.write_mft_record(&mut rec)?;
        self.set_record_bit(number, false)?;
        debug!("freed MFT record {number}");
        Ok(())
    }

    fn find_free_record(&self) -> Option<u64> {
        let records = self.mft_records();
        let bitmap = self.mft_bitmap.as_ref()?;
        let start = self.mft_data_pos.max(FIRST_USER_RECORD).min(records);
        bitmap
            .find_zero(start, records)
            .or_else(|| bitmap.find_zero(FIRST_USER_RECORD, start))
    }

    /// Sequence number a new record in slot `number` gets.
    fn slot_sequence(&mut self, number: u64) -> NtfsResult<u16> {
        let rs = self.geometry.mft_record_size as u64;
        let mft = self
            .mft_data
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        let io = device_of(&mut self.device)?;
        let mut hdr = [0u8; MFT_HDR_SIZE];
        mft.read_at(io, number * rs, &mut hdr)?;
        let sequence = if &hdr[..4] == MFT_RECORD_MAGIC { get_u16(&hdr, MFT_HDR_SEQUENCE) } else { 0 };
        Ok(sequence.max(1))
    }

    fn set_record_bit(&mut self, number: u64, value: bool) -> NtfsResult {
        self.set_record_bits(number, 1, value)
    }

    fn set_record_bits(&mut self, first: u64, count: u64, value: bool) -> NtfsResult {
        let bitmap = self
            .mft_bitmap
            .as_mut()
            .ok_or(NtfsError::InvalidState("$MFT bitmap not loaded"))?;
        let io = device_of(&mut self.device)?;
        bitmap.update(io, &[(first, count)], value)
    }

    /// Appends one cluster's worth of records to `$MFT` (at least one
    /// record, and enough to get past the reserved ones), taking clusters
    /// from the MFT zone. On failure the in-memory streams are restored and
    /// every cluster taken is freed again.
    pub fn grow_mft(&mut self) -> NtfsResult {
        self.ensure_ready()?;
        self.ensure_writable()?;
        let cs = self.geometry.cluster_size as u64;
        let rs = self.geometry.mft_record_size as u64;
        let wanted = (FIRST_USER_RECORD + 1).saturating_sub(self.mft_records()).max(1);
        let clusters = (wanted * rs).div_ceil(cs).max(1);
        let added = clusters * cs / rs;

        let saved_data = self.mft_data.clone();
        let saved_bitmap = self.mft_bitmap.clone();
        let saved_pos = self.mft_data_pos;
        let mut taken = Vec::new();

        match self.extend_mft(clusters, added, &mut taken) {
            Ok(()) => {
                debug!("grew $MFT by {added} records to {}", self.mft_records());
                Ok(())
            }
            Err(e) => {
                warn!("$MFT growth failed: {e}");
                self.mft_data = saved_data;
                self.mft_bitmap = saved_bitmap;
                self.mft_data_pos = saved_pos;
                if !taken.is_empty() {
                    if let Err(e2) = self.free_clusters(&taken) {
                        warn!("could not free clusters taken for $MFT growth: {e2}");
                    }
                }
                Err(e)
            }
        }
    }

    fn extend_mft(&mut self, clusters: u64, added: u64, taken: &mut Vec<ClusterRun>) -> NtfsResult {
        let g = self.geometry;
        let cs = g.cluster_size as u64;
        let rs = g.mft_record_size as u64;
        let old_records = self.mft_records();
        let new_records = old_records + added;

        let runs = self.allocate_clusters(clusters, ZoneHint::Mft)?;
        taken.extend_from_slice(&runs);
        {
            let io = device_of(&mut self.device)?;
            for run in &runs {
                io.zero_fill(g.cluster_offset(run.lcn), run.len * cs)?;
            }
        }

        let data = self
            .mft_data
            .as_mut()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        for run in &runs {
            data.append_run(run.lcn, run.len)?;
        }
        let allocated = data.runlist().map_or(0, |rl| rl.vcn_len()) * cs;
        data.set_sizes(AttrSizes::filled(allocated, new_records * rs))?;

        let bitmap_grown = self.extend_mft_bitmap(new_records, taken)?;
        let reserved = old_records..new_records.min(FIRST_USER_RECORD);
        if !reserved.is_empty() {
            self.set_record_bits(reserved.start, reserved.end - reserved.start, true)?;
        }

        let mut rec0 = self.read_mft_record(FILE_MFT)?;
        let data = self
            .mft_data
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT not loaded"))?;
        let runlist = data.runlist().ok_or(NtfsError::InvalidState("resident $MFT"))?;
        rec0.update_non_resident(AT_DATA, runlist, data.sizes())?;
        if bitmap_grown {
            let stream = self
                .mft_bitmap
                .as_ref()
                .ok_or(NtfsError::InvalidState("$MFT bitmap not loaded"))?
                .stream();
            let runlist = stream.runlist().ok_or(NtfsError::InvalidState("resident $MFT bitmap"))?;
            rec0.update_non_resident(AT_BITMAP, runlist, stream.sizes())?;
        }
        self.write_mft_record(&mut rec0)?;
        self.mft_data_pos = old_records;
        Ok(())
    }

    /// Makes `$MFT:$BITMAP` cover `records` bits, in 8-byte steps. Returns
    /// whether the attribute changed.
    fn extend_mft_bitmap(&mut self, records: u64, taken: &mut Vec<ClusterRun>) -> NtfsResult<bool> {
        let cs = self.geometry.cluster_size as u64;
        let bitmap = self
            .mft_bitmap
            .as_ref()
            .ok_or(NtfsError::InvalidState("$MFT bitmap not loaded"))?;
        let old_len = bitmap.as_bytes().len() as u64;
        let old_sizes = bitmap.stream().sizes();
        let needed = records.div_ceil(8).next_multiple_of(8);
        if needed <= old_len {
            return Ok(false);
        }
        ensure!(
            !bitmap.stream().is_resident(),
            NtfsError::InvalidState("resident $MFT bitmap cannot grow")
        );

        let mut allocated = old_sizes.allocated;
        let mut new_runs = Vec::new();
        if needed > allocated {
            let more = (needed - allocated).div_ceil(cs);
            new_runs = self.allocate_clusters(more, ZoneHint::Mft)?;
            taken.extend_from_slice(&new_runs);
            allocated += more * cs;
        }

        let bitmap = self
            .mft_bitmap
            .as_mut()
            .ok_or(NtfsError::InvalidState("$MFT bitmap not loaded"))?;
        for run in &new_runs {
            bitmap.grow(0, Some((run.lcn, run.len)), old_sizes)?;
        }
        bitmap.grow((needed - old_len) as usize, None, AttrSizes::filled(allocated, needed))?;
        let io = device_of(&mut self.device)?;
        bitmap.write_tail(io, old_len as usize)?;
        Ok(true)
    }
}
