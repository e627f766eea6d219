//! Benchmarks for the CRC primitives and the header codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use iris_core::crc::{crc16, crc32};
use iris_core::frame::{FrameFlags, Header};

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc");
    for size in [64usize, 1024, 4082] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("crc16/{size}"), |b| {
            b.iter(|| crc16(black_box(&data)))
        });
        group.bench_function(format!("crc32/{size}"), |b| {
            b.iter(|| crc32(black_box(&data)))
        });
    }
    group.finish();
}

fn bench_header(c: &mut Criterion) {
    let header = Header {
        seq: 7,
        channel: 2,
        flags: FrameFlags::ack(),
        opcode: 0x26,
        length: 1024,
    };
    let bytes = header.encode();

    c.bench_function("header/encode", |b| b.iter(|| black_box(header).encode()));
    c.bench_function("header/decode", |b| {
        b.iter(|| Header::decode(black_box(&bytes), true).unwrap())
    });
}

criterion_group!(benches, bench_crc, bench_header);
criterion_main!(benches);
