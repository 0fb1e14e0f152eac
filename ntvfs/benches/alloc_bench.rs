// SPDX-License-Identifier: MIT

use criterion::{Criterion, criterion_group, criterion_main};

use ntvfs::*;

criterion_group!(benches, format_bench, alloc_bench);
criterion_main!(benches);

const SIZE_MB: u64 = 64;
const SIZE_BYTES: u64 = SIZE_MB * 1024 * 1024;

fn formatted() -> (MemDeviceIO, NtfsLayout) {
    let layout = FormatParams::new(SIZE_BYTES)
        .with_label("BENCHVOL")
        .with_mft_records(1024)
        .layout()
        .expect("layout failed");
    let mut mem = MemDeviceIO::new(SIZE_BYTES as usize);
    NtfsFormatter::new(&mut mem, &layout)
        .format(false)
        .expect("format failed");
    (mem, layout)
}

pub fn format_bench(c: &mut Criterion) {
    let (mut mem, layout) = formatted();

    c.bench_function("ntfs_format_mem", |b| {
        b.iter(|| {
            let mut formatter = NtfsFormatter::new(&mut mem, &layout);
            formatter.format(false).expect("format failed");
        });
    });

    c.bench_function("ntfs_mount_mem", |b| {
        b.iter(|| {
            let vol = device_mount(Box::new(mem.clone()), MountFlags::RDONLY).expect("mount failed");
            std::hint::black_box(vol.free_cluster_count());
        });
    });
}

pub fn alloc_bench(c: &mut Criterion) {
    let (mem, _) = formatted();
    let mut vol = device_mount(Box::new(mem), MountFlags::empty()).expect("mount failed");

    c.bench_function("ntfs_allocate_free_clusters", |b| {
        b.iter(|| {
            let runs = vol.allocate_clusters(256, ZoneHint::Data).expect("allocate failed");
            vol.free_clusters(&runs).expect("free failed");
        });
    });

    c.bench_function("ntfs_allocate_free_record", |b| {
        b.iter(|| {
            let rec = vol.allocate_record().expect("allocate failed");
            vol.free_record(rec.number()).expect("free failed");
        });
    });

    vol.umount(false).expect("umount failed");
}
