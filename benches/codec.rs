#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use snapgraph::codec::{PrimitiveReader, PrimitiveWriter};
use snapgraph::{Obj, Snapgraph, SnapObject, WireRead, WireWrite};
use std::hint::black_box;

fn bench_varints(c: &mut Criterion) {
    let count = 100_000u64;
    let mut group = c.benchmark_group("Varint Codec");
    group.throughput(Throughput::Elements(count));

    group.bench_function("encode_mixed_widths", |b| {
        b.iter(|| {
            let mut writer = PrimitiveWriter::new(Vec::with_capacity(1 << 20));
            for i in 0..count {
                writer
                    .put_varint(black_box(i.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
                    .expect("varint write failed");
            }
            black_box(writer.close().expect("close failed"));
        });
    });

    let mut writer = PrimitiveWriter::new(Vec::with_capacity(1 << 20));
    for i in 0..count {
        writer
            .put_varint(i.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .expect("varint write failed");
    }
    let encoded = writer.close().expect("close failed");

    group.bench_function("decode_mixed_widths", |b| {
        b.iter(|| {
            let mut reader = PrimitiveReader::new(encoded.as_slice());
            for _ in 0..count {
                black_box(reader.take_varint().expect("varint read failed"));
            }
        });
    });

    group.finish();
}

#[derive(Default, SnapObject)]
struct ChainNode {
    payload: Vec<u64>,
    next: Option<Obj<ChainNode>>,
}

fn build_chain(len: usize) -> Obj<ChainNode> {
    let mut head = Obj::new(ChainNode {
        payload: vec![0; 16],
        next: None,
    });
    for i in 1..len {
        head = Obj::new(ChainNode {
            payload: vec![i as u64; 16],
            next: Some(head),
        });
    }
    head
}

fn bench_graphs(c: &mut Criterion) {
    let node_count = 1_000;
    let chain = build_chain(node_count);

    let mut group = c.benchmark_group("Graph Roundtrip");
    group.throughput(Throughput::Elements(node_count as u64));

    group.bench_function("serialize_chain", |b| {
        b.iter(|| {
            black_box(Snapgraph::to_vec(&chain).expect("serialization failed"));
        });
    });

    let bytes = Snapgraph::to_vec(&chain).expect("serialization failed");
    group.bench_function("deserialize_chain", |b| {
        b.iter(|| {
            let restored: Obj<ChainNode> =
                Snapgraph::from_slice(&bytes).expect("deserialization failed");
            black_box(restored.borrow().payload[0]);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_varints, bench_graphs);
criterion_main!(benches);
