// SPDX-License-Identifier: MIT

//! `$LogFile` inspection and reset.
//!
//! Only the restart area is looked at: enough to tell an empty journal from
//! a cleanly shut down one and from one that still holds transactions.
//! Nothing is ever replayed.

use alloc::{vec, vec::Vec};

use log::{debug, info, warn};

use crate::common::errors::*;
use crate::ntfs::{constant::*, utils::*, volume::{Volume, device_of}};

/// Bytes inspected at the start of `$LogFile`: two restart pages.
pub const LOGFILE_PROBE_SIZE: usize = 2 * LOGFILE_PAGE_SIZE;

/// What the restart area says about the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JournalState {
    /// Every probed byte is `0xFF`.
    Empty,
    /// Restart area present and marked clean, or no client in use.
    #[default]
    Clean,
    /// Anything else: pending transactions or an unreadable restart area.
    Dirty,
}

/// Classifies the first bytes of `$LogFile`.
pub fn classify(head: &[u8]) -> JournalState {
    let head = &head[..head.len().min(LOGFILE_PROBE_SIZE)];
    if head.iter().all(|&b| b == 0xFF) {
        return JournalState::Empty;
    }
    if head.len() < NTFS_BLOCK_SIZE || &head[..4] != RSTR_MAGIC {
        // CHKD and unknown magics alike
        return JournalState::Dirty;
    }

    let area = get_u16(head, RESTART_HDR_AREA_OFFSET) as usize;
    if area < RESTART_HDR_AREA_OFFSET + 2 || area + RESTART_AREA_FLAGS + 2 > NTFS_BLOCK_SIZE - 2 {
        return JournalState::Dirty;
    }
    let client_in_use = get_u16(head, area + RESTART_AREA_CLIENT_IN_USE);
    let flags = get_u16(head, area + RESTART_AREA_FLAGS);
    if flags & RESTART_VOLUME_IS_CLEAN != 0 || client_in_use == LOGFILE_NO_CLIENT {
        JournalState::Clean
    } else {
        JournalState::Dirty
    }
}

/// One restart page with update sequence protection applied.
///
/// A clean page has no client in use and the clean flag set; a dirty one
/// claims client 0 is active.
pub fn restart_page(clean: bool) -> Vec<u8> {
    let mut page = vec![0u8; LOGFILE_PAGE_SIZE];
    let usa_ofs = 0x1E;
    let usa_count = LOGFILE_PAGE_SIZE / NTFS_BLOCK_SIZE + 1;

    page[..4].copy_from_slice(RSTR_MAGIC);
    put_u16(&mut page, 4, usa_ofs as u16);
    put_u16(&mut page, 6, usa_count as u16);
    put_u32(&mut page, 0x10, LOGFILE_PAGE_SIZE as u32);
    put_u32(&mut page, 0x14, LOGFILE_PAGE_SIZE as u32);
    put_u16(&mut page, RESTART_HDR_AREA_OFFSET, RESTART_AREA_OFFSET as u16);
    put_u16(&mut page, 0x1A, 1);
    put_u16(&mut page, 0x1C, 1);

    let area = RESTART_AREA_OFFSET;
    put_u16(&mut page, area + 8, 1);
    put_u16(&mut page, area + 10, LOGFILE_NO_CLIENT);
    if clean {
        put_u16(&mut page, area + RESTART_AREA_CLIENT_IN_USE, LOGFILE_NO_CLIENT);
        put_u16(&mut page, area + RESTART_AREA_FLAGS, RESTART_VOLUME_IS_CLEAN);
    } else {
        put_u16(&mut page, area + RESTART_AREA_CLIENT_IN_USE, 0);
        put_u16(&mut page, area + RESTART_AREA_FLAGS, 0);
    }

    let usn = 1u16;
    put_u16(&mut page, usa_ofs, usn);
    for i in 1..usa_count {
        let tail = i * NTFS_BLOCK_SIZE - 2;
        let saved = get_u16(&page, tail);
        put_u16(&mut page, usa_ofs + 2 * i, saved);
        put_u16(&mut page, tail, usn);
    }
    page
}

impl Volume {
    /// Reads the restart area and classifies the journal.
    pub fn check_logfile(&mut self) -> NtfsResult<JournalState> {
        let logfile = self
            .logfile
            .as_ref()
            .ok_or(NtfsError::InvalidState("$LogFile not loaded"))?;
        let io = device_of(&mut self.device)?;

        let probe = (logfile.len() as usize).min(LOGFILE_PROBE_SIZE);
        if probe == 0 {
            return Ok(JournalState::Empty);
        }
        let mut head = vec![0u8; probe];
        logfile.read_at(io, 0, &mut head)?;
        let state = classify(&head);
        debug!("$LogFile: {state:?}");
        Ok(state)
    }

    /// Marks the journal empty by filling all of `$LogFile` with `0xFF`.
    ///
    /// Refused on read-only volumes before any I/O.
    pub fn reset_logfile(&mut self) -> NtfsResult {
        self.ensure_writable()?;
        let logfile = self
            .logfile
            .as_ref()
            .ok_or(NtfsError::InvalidState("$LogFile not loaded"))?;
        let io = device_of(&mut self.device)?;

        let len = logfile.len();
        if let Err(e) = logfile.fill(io, 0, len, 0xFF) {
            warn!("$LogFile reset failed: {e}");
            return Err(e);
        }
        self.state.set_logfile_empty(true);
        self.journal = JournalState::Empty;
        info!("$LogFile reset ({len} bytes)");
        Ok(())
    }

    /// Journal classification made at mount, or `Empty` after a reset.
    #[inline]
    pub fn journal_state(&self) -> JournalState {
        self.journal
    }
}
