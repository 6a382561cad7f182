//! Benchmarks for layout planning and full rebuilds

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use img_factory_rs::{
    ArchiveEntry, ArchiveHandle, LayoutPlanner, RebuildEngine, RebuildMode, Version,
};
use tempfile::TempDir;

fn create_entries(count: usize) -> Vec<ArchiveEntry> {
    (0..count)
        .map(|i| ArchiveEntry::resident(format!("model{}.dff", i), vec![0u8; (i % 7 + 1) * 700]))
        .collect()
}

fn benchmark_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_plan");

    for count in [100, 1000, 10000].iter() {
        let entries = create_entries(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| black_box(LayoutPlanner::plan(entries, Version::V2).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(10);

    for (mode, label) in [(RebuildMode::Fast, "fast"), (RebuildMode::Safe, "safe")] {
        for count in [50, 500].iter() {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("bench.img");

            let mut handle = ArchiveHandle::create(&path, Version::V2).unwrap();
            let mut bytes = 0u64;
            for i in 0..*count {
                let data = vec![(i % 251) as u8; 4096 + i * 3];
                bytes += data.len() as u64;
                handle.add_entry(format!("e{}.txd", i), data).unwrap();
            }
            RebuildEngine::new(mode).rebuild(&mut handle).unwrap();

            group.throughput(Throughput::Bytes(bytes));
            group.bench_with_input(BenchmarkId::new(label, count), count, |b, _| {
                // Every iteration copies all payloads from the previous output
                b.iter(|| black_box(RebuildEngine::new(mode).rebuild(&mut handle).unwrap()));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_plan, benchmark_rebuild);
criterion_main!(benches);
