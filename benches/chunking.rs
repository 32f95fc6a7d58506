//! 청크 분할/조립 벤치마크

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use arqft::{Chunker, FileSequence, Reassembly, DEFAULT_CHUNK_SIZE};

fn file_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let data = file_of(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("from_bytes", size), &data, |b, data| {
            b.iter(|| FileSequence::from_bytes(black_box(data), DEFAULT_CHUNK_SIZE).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("chunker", size), &data, |b, data| {
            b.iter(|| {
                let chunker = Chunker::new(black_box(&data[..]), DEFAULT_CHUNK_SIZE).unwrap();
                FileSequence::collect(chunker).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");

    for size in [64 * 1024, 1024 * 1024] {
        let sequence = FileSequence::from_bytes(&file_of(size), DEFAULT_CHUNK_SIZE).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        // 역순 도착
        group.bench_with_input(BenchmarkId::new("reverse", size), &sequence, |b, sequence| {
            b.iter(|| {
                let mut reassembly = Reassembly::new();
                for packet in sequence.packets().iter().rev() {
                    reassembly.insert(packet.clone());
                }
                reassembly.into_bytes()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunking, bench_reassembly);
criterion_main!(benches);
