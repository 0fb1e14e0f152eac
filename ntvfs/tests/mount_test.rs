// SPDX-License-Identifier: MIT

mod common;

use common::*;
use ntvfs::ntfs::constant::{AT_DATA, DEFAULT_MFT_ZONE_MULTIPLIER, FILE_BITMAP};
use ntvfs::ntfs::runlist::Runlist;
use ntvfs::*;

const LOGFILE: std::ops::Range<usize> = 3 * 4096..67 * 4096;

#[test]
fn test_mount_reaches_ready() {
    let mem = default_image();
    let vol = mount_default(&mem);

    assert_eq!(vol.mount_state(), MountState::Ready);
    assert_eq!(vol.name(), "TESTVOL");
    assert_eq!(vol.version(), NtfsVersion::V3_1);
    assert!(vol.is_version_supported());
    assert!(!vol.is_read_only());
    assert!(!vol.is_mftmirr_mismatch());

    let g = vol.geometry();
    assert_eq!(g.nr_clusters, 1000);
    assert_eq!(g.cluster_size, 4096);
    assert_eq!(g.mft_record_size, 1024);
    assert_eq!(g.mft_lcn, 102);
    assert_eq!(g.mftmirr_lcn, 2);
    assert_eq!(g.mftmirr_size, 4);

    assert_eq!(vol.mft_records(), 80);
    assert_eq!(vol.mft_data_pos(), 64);
    assert_eq!(vol.free_cluster_count(), 1000 - 122);
    assert_eq!(vol.upcase().map(|u| u.upper('a' as u16)), Some('A' as u16));
    assert!(vol.attrdef().and_then(|a| a.find(AT_DATA)).is_some());
    assert_eq!(vol.zones().mft_zone_multiplier, DEFAULT_MFT_ZONE_MULTIPLIER);
    // A quarter of the volume, starting at $MFT
    assert_eq!(vol.zones().mft_zone(), 102..352);
}

#[test]
fn test_zone_invariants_after_mount() {
    let mem = default_image();
    for multiplier in 1..=8 {
        let vol = mount_mem(&mem, MountOptions::default().with_mft_zone_multiplier(multiplier))
            .expect("mount failed");
        let z = *vol.zones();
        let bits = vol.cluster_bitmap().expect("bitmap loaded");
        assert!(bits.len() as u64 * 8 >= vol.nr_clusters());
        assert!(z.mft_zone_start <= z.mft_zone_pos);
        assert!(z.mft_zone_pos <= z.mft_zone_end);
        assert!(z.mft_zone_end <= vol.nr_clusters());
        assert!(z.data_split <= vol.nr_clusters());
    }
}

#[test]
fn test_bad_multiplier_rejected() {
    let mem = default_image();
    for multiplier in [0, 9] {
        let err = mount_mem(&mem, MountOptions::default().with_mft_zone_multiplier(multiplier)).unwrap_err();
        assert!(matches!(err, NtfsError::InvalidState(_)));
    }
}

#[test]
fn test_supported_versions() {
    for (major, minor) in [(1, 1), (1, 2), (2, 0), (2, 5), (3, 0), (3, 1)] {
        assert!(is_supported(major, minor));
        let mem = image(&default_params().with_version(NtfsVersion::new(major, minor)));
        let vol = mount_default(&mem);
        assert!(vol.is_version_supported(), "{major}.{minor}");
        assert_eq!(vol.version(), NtfsVersion::new(major, minor));
    }
}

#[test]
fn test_unsupported_versions_fail_mount() {
    for (major, minor) in [(4, 0), (0, 9)] {
        assert!(!is_supported(major, minor));
        let mem = image(&default_params().with_version(NtfsVersion::new(major, minor)));
        let err = mount_mem(&mem, MountOptions::default()).unwrap_err();
        assert_eq!(err, NtfsError::VersionUnsupported { major, minor });
    }
}

#[test]
fn test_journal_states() {
    let vol = mount_default(&image(&default_params()));
    assert_eq!(vol.journal_state(), JournalState::Empty);
    assert!(vol.state().is_logfile_empty());

    let vol = mount_default(&image(&default_params().with_journal(JournalState::Clean)));
    assert_eq!(vol.journal_state(), JournalState::Clean);
    assert!(!vol.state().is_logfile_empty());

    // A dirty journal is reported, not fatal
    let vol = mount_default(&image(&default_params().with_journal(JournalState::Dirty)));
    assert_eq!(vol.journal_state(), JournalState::Dirty);
    assert_eq!(vol.mount_state(), MountState::Ready);
}

#[test]
fn test_reset_logfile_empties_journal() {
    let mem = image(&default_params().with_journal(JournalState::Dirty));
    let mut vol = mount_default(&mem);
    vol.reset_logfile().expect("reset failed");
    assert_eq!(vol.journal_state(), JournalState::Empty);
    assert!(vol.state().is_logfile_empty());
    vol.umount(false).expect("umount failed");

    assert!(mem.snapshot()[LOGFILE].iter().all(|&b| b == 0xFF));
    let vol = mount_default(&mem);
    assert_eq!(vol.journal_state(), JournalState::Empty);
}

#[test]
fn test_read_only_volume_refuses_writes() {
    let mem = image(&default_params().with_journal(JournalState::Clean));
    let before = mem.snapshot();
    let mut vol = mount_mem(&mem, MountOptions::default().read_only()).expect("mount failed");
    assert!(vol.is_read_only());

    assert_eq!(vol.reset_logfile(), Err(NtfsError::ReadOnlyViolation));
    assert_eq!(vol.journal_state(), JournalState::Clean);
    assert_eq!(vol.allocate_clusters(1, ZoneHint::Data).unwrap_err(), NtfsError::ReadOnlyViolation);
    assert_eq!(
        vol.free_clusters(&[ClusterRun::new(102, 1)]),
        Err(NtfsError::ReadOnlyViolation)
    );
    assert_eq!(vol.allocate_record().unwrap_err(), NtfsError::ReadOnlyViolation);
    assert_eq!(vol.write_volume_flags(VolumeFlags::IS_DIRTY), Err(NtfsError::ReadOnlyViolation));
    assert_eq!(vol.set_volume_flags(VolumeFlags::IS_DIRTY), Err(NtfsError::ReadOnlyViolation));
    vol.umount(false).expect("umount failed");

    assert!(mem.snapshot() == before, "read-only mount changed the image");
}

#[test]
fn test_read_only_device_forces_read_only_state() {
    let mem = default_image();
    let vol = device_mount(Box::new(mem.read_only()), MountFlags::empty()).expect("mount failed");
    assert!(vol.is_read_only());
}

#[test]
fn test_write_volume_flags_persists() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    vol.write_volume_flags(VolumeFlags::IS_DIRTY | VolumeFlags::CHKDSK_UNDERWAY)
        .expect("write failed");
    assert_eq!(vol.volume_flags(), VolumeFlags::IS_DIRTY | VolumeFlags::CHKDSK_UNDERWAY);

    // Visible on disk before unmount; $Volume is mirrored too
    let other = mount_default(&mem);
    assert_eq!(other.volume_flags(), VolumeFlags::IS_DIRTY | VolumeFlags::CHKDSK_UNDERWAY);
    assert!(!other.is_mftmirr_mismatch());

    vol.write_volume_flags(VolumeFlags::empty()).expect("write failed");
    vol.umount(false).expect("umount failed");
    assert_eq!(mount_default(&mem).volume_flags(), VolumeFlags::empty());
}

#[test]
fn test_deferred_volume_flags_written_at_umount() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    vol.set_volume_flags(VolumeFlags::IS_DIRTY).expect("set failed");
    assert_eq!(vol.volume_flags(), VolumeFlags::IS_DIRTY);
    assert_eq!(mount_default(&mem).volume_flags(), VolumeFlags::empty());

    vol.umount(false).expect("umount failed");
    assert_eq!(mount_default(&mem).volume_flags(), VolumeFlags::IS_DIRTY);
}

#[test]
fn test_mirror_mismatch_detected() {
    let mem = default_image();
    // Corrupt a byte inside mirrored record 1
    mem.with_bytes_mut(|b| b[2 * 4096 + 1024 + 200] ^= 0x5A);
    let vol = mount_default(&mem);
    assert_eq!(vol.mount_state(), MountState::Ready);
    assert!(vol.is_mftmirr_mismatch());
}

#[test]
fn test_mirror_write_failure_keeps_primary() {
    let mem = default_image();
    let (mut vol, faults) = mount_faulty(&mem, MountOptions::default());
    faults.fail_writes(2 * CLUSTER, CLUSTER);

    vol.write_volume_flags(VolumeFlags::IS_DIRTY).expect("primary write failed");
    assert!(vol.is_mftmirr_mismatch());

    let other = mount_default(&mem);
    assert_eq!(other.volume_flags(), VolumeFlags::IS_DIRTY);
    assert!(other.is_mftmirr_mismatch());
}

#[test]
fn test_boot_sector_rejected() {
    let mem = default_image();
    mem.with_bytes_mut(|b| b[510] = 0);
    let err = mount_mem(&mem, MountOptions::default()).unwrap_err();
    assert_eq!(err, NtfsError::Format(FormatError::BadBootSignature));

    let img = default_image().snapshot();
    let truncated = MemDeviceIO::from_vec(img[..img.len() / 2].to_vec());
    let err = device_mount(Box::new(truncated), MountFlags::empty()).unwrap_err();
    assert_eq!(err, NtfsError::Format(FormatError::VolumeTooLarge));
}

#[test]
fn test_corrupt_mft_record_fails_mount() {
    let mem = default_image();
    mem.with_bytes_mut(|b| b[102 * 4096..102 * 4096 + 4].copy_from_slice(b"BAAD"));
    let err = mount_mem(&mem, MountOptions::default()).unwrap_err();
    assert_eq!(err, NtfsError::Format(FormatError::BadRecordMagic(0)));
}

#[test]
fn test_bitmap_run_past_volume_fails_mount() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    let mut rec = vol.read_mft_record(FILE_BITMAP).expect("read failed");
    let attr = rec.require(AT_DATA).expect("no $DATA");
    let sizes = rec.non_resident(&attr).expect("resident $DATA").sizes;
    let mut runs = Runlist::new();
    runs.push(Some(67), 2000);
    rec.update_non_resident(AT_DATA, &runs, sizes).expect("update failed");
    vol.write_mft_record(&mut rec).expect("write failed");
    vol.umount(false).expect("umount failed");

    let err = mount_mem(&mem, MountOptions::default()).unwrap_err();
    assert_eq!(
        err,
        NtfsError::Format(FormatError::RunPastVolume { record: FILE_BITMAP, lcn_end: 2067 })
    );
}

#[test]
fn test_startup_loads_geometry_only() {
    let mem = default_image();
    let vol = startup(Box::new(mem), MountFlags::RDONLY).expect("startup failed");
    assert_eq!(vol.mount_state(), MountState::GeometryLoaded);
    assert!(vol.is_read_only());
    assert_eq!(vol.nr_clusters(), 1000);
    assert_eq!(vol.mft_records(), 0);
}

#[test]
fn test_umount_busy_then_forced() {
    let mem = default_image();
    let (mut vol, faults) = mount_faulty(&mem, MountOptions::default());

    faults.pending.set(true);
    assert_eq!(vol.umount(false), Err(NtfsError::Busy));
    assert_eq!(vol.mount_state(), MountState::Ready);
    vol.allocate_clusters(1, ZoneHint::Data).expect("volume still usable");

    faults.pending.set(false);
    faults.fail_flush.set(true);
    assert_eq!(vol.umount(false), Err(NtfsError::Busy));

    vol.umount(true).expect("forced umount failed");
    assert_eq!(vol.mount_state(), MountState::Unmounted);
    assert!(vol.umount(false).is_err());
    assert!(vol.allocate_clusters(1, ZoneHint::Data).is_err());
}

#[test]
fn test_forced_umount_tolerates_flag_write_failure() {
    let mem = default_image();
    let (mut vol, faults) = mount_faulty(&mem, MountOptions::default());
    vol.set_volume_flags(VolumeFlags::IS_DIRTY).expect("set failed");
    faults.fail_writes(102 * CLUSTER, CLUSTER);

    assert!(matches!(vol.umount(false), Err(NtfsError::Device(_))));
    assert_eq!(vol.mount_state(), MountState::Ready);
    vol.umount(true).expect("forced umount failed");
    assert_eq!(mount_default(&mem).volume_flags(), VolumeFlags::empty());
}

#[test]
fn test_dir_cache_lifecycle() {
    let mut vol = mount_default(&default_image());
    assert!(vol.attach_dir_cache(0).is_err());
    vol.attach_dir_cache(4).expect("attach failed");

    let cache = vol.dir_cache().expect("cache attached");
    cache.put(5, vec![1u8, 2, 3].into_boxed_slice());
    assert_eq!(cache.get(5), Some(&[1u8, 2, 3][..]));

    vol.umount(false).expect("umount failed");
    assert!(vol.dir_cache().is_none());
}

#[test]
fn test_mount_image_file() {
    let mem = default_image();
    let file = tempfile::NamedTempFile::new().expect("tempfile failed");
    std::fs::write(file.path(), mem.snapshot()).expect("write image failed");

    // An image file is never in the host mount table
    assert!(check_if_mounted(file.path()).expect("check failed").is_empty());

    let mut vol = mount(file.path(), MountFlags::EXCLUSIVE).expect("mount failed");
    let runs = vol.allocate_clusters(8, ZoneHint::Data).expect("allocate failed");
    vol.umount(false).expect("umount failed");

    let vol = mount(file.path(), MountFlags::RDONLY).expect("remount failed");
    assert!(vol.is_read_only());
    assert_eq!(vol.free_cluster_count(), 1000 - 122 - 8);
    assert!(runs.iter().all(|r| vol.is_cluster_allocated(r.lcn)));
}
