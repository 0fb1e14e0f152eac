// SPDX-License-Identifier: MIT

mod common;

use common::*;
use ntvfs::*;

fn mount_mult2(mem: &MemDeviceIO) -> Volume {
    mount_mem(mem, MountOptions::default().with_mft_zone_multiplier(2)).expect("mount failed")
}

#[test]
fn test_mft_zone_scenario() {
    let mem = default_image();
    let mut vol = mount_mult2(&mem);

    let z = *vol.zones();
    assert_eq!(z.mft_zone_end - z.mft_zone_start, 500);
    assert_eq!(z.data_split, 750);
    // $MFT itself occupies the first 20 clusters of the zone
    assert_eq!(z.mft_zone_pos, 122);
    assert_eq!(z.data1_zone_pos, 602);
    assert_eq!(z.data2_zone_pos, 750);

    let runs = vol.allocate_clusters(10, ZoneHint::Mft).expect("allocate failed");
    assert_eq!(runs, vec![ClusterRun::new(122, 10)]);
    assert!(runs.iter().all(|r| r.lcn >= z.mft_zone_start && r.end() <= z.mft_zone_end));
    assert_eq!(vol.zones().mft_zone_pos, z.mft_zone_pos + 10);
    assert_eq!(vol.zones().data1_zone_pos, 602);
}

#[test]
fn test_data_hint_keeps_out_of_mft_zone() {
    let mem = default_image();
    let mut vol = mount_mult2(&mem);

    let first = vol.allocate_clusters(10, ZoneHint::Data).expect("allocate failed");
    let second = vol.allocate_clusters(10, ZoneHint::Data).expect("allocate failed");
    assert_eq!(first, vec![ClusterRun::new(602, 10)]);
    assert_eq!(second, vec![ClusterRun::new(612, 10)]);
    assert_eq!(vol.zones().mft_zone_pos, 122);
}

#[test]
fn test_allocation_spills_across_zones() {
    let mem = default_image();
    let mut vol = mount_mult2(&mem);

    // data1 holds 148 free clusters and data2 250; they are adjacent at 750
    let runs = vol.allocate_clusters(500, ZoneHint::Data).expect("allocate failed");
    assert_eq!(runs, vec![ClusterRun::new(602, 398), ClusterRun::new(122, 102)]);
    assert_eq!(runs.iter().map(|r| r.len).sum::<u64>(), 500);
    assert_eq!(vol.free_cluster_count(), 1000 - 122 - 500);
}

#[test]
fn test_allocate_then_free_restores_bitmap() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    let before = vol.cluster_bitmap().expect("bitmap loaded").to_vec();
    let disk_before = mem.snapshot();

    let mut runs = vol.allocate_clusters(37, ZoneHint::Data).expect("allocate failed");
    runs.extend(vol.allocate_clusters(5, ZoneHint::Mft).expect("allocate failed"));
    assert_eq!(vol.free_cluster_count(), 1000 - 122 - 42);
    for r in &runs {
        assert!((r.lcn..r.end()).all(|lcn| vol.is_cluster_allocated(lcn)));
    }

    vol.free_clusters(&runs).expect("free failed");
    assert_eq!(vol.cluster_bitmap().expect("bitmap loaded"), &before[..]);
    vol.umount(false).expect("umount failed");
    assert!(mem.snapshot() == disk_before, "on-disk $Bitmap not restored");
}

#[test]
fn test_over_allocation_leaves_bitmap_unchanged() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    let free = vol.free_cluster_count();
    let before = vol.cluster_bitmap().expect("bitmap loaded").to_vec();
    let zones = *vol.zones();

    assert_eq!(vol.allocate_clusters(free + 1, ZoneHint::Data), Err(NtfsError::NoSpace));
    assert_eq!(vol.cluster_bitmap().expect("bitmap loaded"), &before[..]);
    assert_eq!(vol.zones(), &zones);

    // Exactly the free count still fits
    let runs = vol.allocate_clusters(free, ZoneHint::Data).expect("allocate failed");
    assert_eq!(runs.iter().map(|r| r.len).sum::<u64>(), free);
    assert_eq!(vol.free_cluster_count(), 0);
    assert_eq!(vol.allocate_clusters(1, ZoneHint::Mft), Err(NtfsError::NoSpace));
}

#[test]
fn test_zero_count_is_a_no_op() {
    let mem = default_image();
    let counter = IOCounter::new(mem.clone());
    let stats = counter.handle();
    let mut vol = device_mount(Box::new(counter), MountFlags::empty()).expect("mount failed");

    let before = stats.snapshot();
    assert_eq!(vol.allocate_clusters(0, ZoneHint::Data), Ok(Vec::new()));
    assert_eq!(vol.free_clusters(&[]), Ok(()));
    assert_eq!(stats.snapshot().writes, before.writes);
}

#[test]
fn test_free_rejects_invalid_runs() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    let runs = vol.allocate_clusters(4, ZoneHint::Data).expect("allocate failed");
    let before = vol.cluster_bitmap().expect("bitmap loaded").to_vec();

    let cases = [
        ClusterRun::new(998, 4),
        ClusterRun::new(u64::MAX, 2),
        ClusterRun::new(900, 1),
        ClusterRun::new(runs[0].lcn, runs[0].len + 1),
    ];
    for run in cases {
        assert_eq!(
            vol.free_clusters(&[runs[0], run]),
            Err(NtfsError::Alloc(AllocError::InvalidRun { lcn: run.lcn, len: run.len }))
        );
        assert_eq!(vol.cluster_bitmap().expect("bitmap loaded"), &before[..]);
    }
}

#[test]
fn test_failed_bitmap_write_rolls_back() {
    let mem = default_image();
    let (mut vol, faults) = mount_faulty(&mem, MountOptions::default().with_mft_zone_multiplier(2));
    let before = vol.cluster_bitmap().expect("bitmap loaded").to_vec();
    let zones = *vol.zones();

    // $Bitmap lives in cluster 67
    faults.fail_writes(67 * CLUSTER, CLUSTER);
    assert!(matches!(vol.allocate_clusters(10, ZoneHint::Data), Err(NtfsError::Device(_))));
    assert_eq!(vol.cluster_bitmap().expect("bitmap loaded"), &before[..]);
    assert_eq!(vol.zones(), &zones);
    assert_eq!(vol.free_cluster_count(), 1000 - 122);

    faults.heal();
    let runs = vol.allocate_clusters(10, ZoneHint::Data).expect("allocate failed");
    assert_eq!(runs, vec![ClusterRun::new(602, 10)]);
}

#[test]
fn test_allocations_persist_across_remount() {
    let mem = default_image();
    let mut vol = mount_default(&mem);
    let runs = vol.allocate_clusters(64, ZoneHint::Data).expect("allocate failed");
    vol.umount(false).expect("umount failed");

    let vol = mount_default(&mem);
    assert_eq!(vol.free_cluster_count(), 1000 - 122 - 64);
    for r in &runs {
        assert!((r.lcn..r.end()).all(|lcn| vol.is_cluster_allocated(lcn)));
    }
    assert!(!vol.is_cluster_allocated(1000));
}
