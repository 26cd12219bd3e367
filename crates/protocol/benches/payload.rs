//! Benchmarks for the per-packet wire paths
//!
//! Measures the work done for every isochronous packet and every negotiation:
//! - Payload header parsing with and without timestamps
//! - Probe/commit block encoding and decoding
//! - Descriptor range walking

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use uvc_protocol::{
    DescriptorIter, HeaderFlags, PROBE_SIZE_V10, PROBE_SIZE_V11, PROBE_SIZE_V15, PayloadHeader,
    Scr, StreamControl,
};

fn benchmark_payload_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_header");

    let minimal = PayloadHeader::encode(HeaderFlags::FID | HeaderFlags::EOH, None, None);
    group.bench_function("parse_minimal", |b| {
        b.iter(|| PayloadHeader::parse(black_box(&minimal)))
    });

    let full = PayloadHeader::encode(
        HeaderFlags::FID | HeaderFlags::EOF | HeaderFlags::EOH,
        Some(0x1234_5678),
        Some(Scr {
            stc: 0x0102_0304,
            sof: 0x0234,
        }),
    );
    group.bench_function("parse_pts_scr", |b| {
        b.iter(|| PayloadHeader::parse(black_box(&full)))
    });

    group.finish();
}

fn benchmark_probe_control(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe_control");

    let ctrl = StreamControl {
        format_index: 1,
        frame_index: 3,
        frame_interval: 333_333,
        max_video_frame_size: 614_400,
        max_payload_transfer_size: 3072,
        ..Default::default()
    };

    for size in [PROBE_SIZE_V10, PROBE_SIZE_V11, PROBE_SIZE_V15] {
        group.bench_with_input(BenchmarkId::new("encode", size), &size, |b, &size| {
            b.iter(|| ctrl.encode(black_box(size)))
        });

        let bytes = ctrl.encode(size).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| StreamControl::decode(black_box(bytes)))
        });
    }

    group.finish();
}

fn benchmark_descriptor_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_walk");

    for count in [8usize, 64, 256] {
        let mut range = Vec::new();
        for i in 0..count {
            range.extend_from_slice(&[9, 0x24, 0x03, i as u8, 0x01, 0x01, 0x00, 0x01, 0x00]);
        }

        group.throughput(Throughput::Bytes(range.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &range, |b, range| {
            b.iter(|| DescriptorIter::new(black_box(range)).count())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_payload_headers,
    benchmark_probe_control,
    benchmark_descriptor_walk
);
criterion_main!(benches);
