use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use sigbridge_core::{
    assemble::ChunkAssembler,
    decompose::decompose_with_id,
    types::{DEFAULT_CHUNK_BYTES, Transaction},
};

const DATA_SIZES: [usize; 3] = [64 * 1024, 4 * 1024 * 1024, 32 * 1024 * 1024];
const TAG_COUNT: usize = 64;

fn transaction(data_size: usize) -> Transaction {
    (0..TAG_COUNT).fold(
        Transaction::new(vec![0xAB_u8; data_size]),
        |tx, i| tx.with_tag(format!("Tag-{i}"), format!("value-{i}")),
    )
}

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");

    for size in DATA_SIZES {
        let tx = transaction(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("bytes/{size}"), |b| {
            b.iter(|| {
                let d = decompose_with_id(black_box(&tx), "bench".into(), DEFAULT_CHUNK_BYTES)
                    .unwrap();
                black_box(d);
            });
        });
    }

    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for size in DATA_SIZES {
        let tx = transaction(size);
        let d = decompose_with_id(&tx, "bench".into(), DEFAULT_CHUNK_BYTES).unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("bytes/{size}"), |b| {
            b.iter(|| {
                let mut assembler =
                    ChunkAssembler::new(d.collection_id.clone(), d.transaction.clone());
                for chunk in d.chunks() {
                    assembler.push(chunk.clone().into()).unwrap();
                }
                black_box(assembler.push(d.end_marker().into()).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decompose, bench_reassemble);
criterion_main!(benches);
