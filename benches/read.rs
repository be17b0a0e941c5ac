use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::{tempdir, TempDir};

use complog::{ArchiveReader, ArchiveWriter, InvocationKind, Language};

const INVOCATIONS: usize = 200;

fn archive(size: usize) -> (TempDir, ArchiveReader) {
    let dir = tempdir().expect("tempdir");
    let mut writer = ArchiveWriter::create(dir.path().join("bench.complog")).expect("writer");
    for i in 0..INVOCATIONS {
        let path = dir.path().join(format!("src/F{i}.cs"));
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let mut text = format!("class F{i} {{}}\n").into_bytes();
        text.resize(size, b' ');
        std::fs::write(&path, text).expect("write");
        writer
            .begin_invocation(
                format!("/bench/p{i}/p{i}.csproj"),
                Language::CSharp,
                InvocationKind::Regular,
            )
            .expect("begin")
            .add_source(&path)
            .commit()
            .expect("commit");
    }
    let reader = writer.seal().expect("seal").open().expect("open");
    (dir, reader)
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    for &size in &[256_usize, 65_536] {
        let (_dir, reader) = archive(size);
        group.bench_with_input(BenchmarkId::new("records", size), &reader, |b, reader| {
            b.iter(|| {
                for index in 0..reader.count() {
                    black_box(reader.record(index).expect("record"));
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("sources", size), &reader, |b, reader| {
            b.iter(|| {
                for record in reader.records() {
                    let record = record.expect("record");
                    for source in record.sources() {
                        black_box(reader.blob_bytes(&source.key).expect("blob"));
                    }
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("identity", size), &reader, |b, reader| {
            b.iter(|| {
                for index in 0..reader.count() {
                    black_box(reader.identity_hash(index).expect("hash"));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_read);
criterion_main!(benches);
