//! Criterion micro-benchmarks for the recording format.

use std::hint::black_box;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use mongoreplay_bench::{recorded_traffic, recording_bytes};
use mongoreplay_record::{
    OpStream, OpStreamConfig, PlaybackFileMetadata, RecordingReader, RecordingWriter,
};

/// Benchmark: write 1 200 recorded ops to memory.
fn bench_write(c: &mut Criterion) {
    let ops = recorded_traffic(1_200, 16);
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Elements(ops.len() as u64));
    group.bench_function("write", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(1 << 20);
            let mut w = RecordingWriter::new(&mut buf, &PlaybackFileMetadata::default()).unwrap();
            for op in &ops {
                w.write_op(op).unwrap();
            }
            black_box(w.ops_written())
        });
    });
    group.finish();
}

/// Benchmark: sequential read back.
fn bench_read_sequential(c: &mut Criterion) {
    let bytes = recording_bytes(&recorded_traffic(1_200, 16));
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("read_sequential", |b| {
        b.iter(|| {
            let reader = RecordingReader::open(bytes.as_slice()).unwrap();
            black_box(reader.ops().count())
        });
    });
    group.finish();
}

/// Benchmark: the same read through the parallel decode pipeline.
fn bench_read_op_stream(c: &mut Criterion) {
    let bytes = std::sync::Arc::new(recording_bytes(&recorded_traffic(1_200, 16)));
    let config = OpStreamConfig {
        decode_workers: 4,
        ..OpStreamConfig::default()
    };
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("read_op_stream", |b| {
        b.iter(|| {
            let bytes = std::sync::Arc::clone(&bytes);
            let mut stream = OpStream::spawn(
                move || RecordingReader::open(Cursor::new(bytes.as_ref().clone())),
                &config,
            )
            .unwrap();
            let n = stream.by_ref().count();
            stream.join();
            black_box(n)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_write, bench_read_sequential, bench_read_op_stream);
criterion_main!(benches);
