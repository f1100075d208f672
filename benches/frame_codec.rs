//! Frame codec benchmark suite.
//!
//! Benchmarks outbound encoding and inbound decoding at different sizes:
//! - Payload sizes: 16 B, 125 B, 4 KiB, 64 KiB, 1 MiB
//! - Whole-buffer feeds and 1 KiB chunked feeds
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use wsock_client::protocol::{FrameDecoder, MessageType, ProtocolVersion, encode};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 125, 4 * 1024, 64 * 1024, 1024 * 1024];
const FEED_CHUNK: usize = 1024;

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Benchmark: Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in PAYLOAD_SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("binary", size), &data, |b, data| {
            b.iter(|| encode(MessageType::Binary, black_box(data), ProtocolVersion::V13));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in PAYLOAD_SIZES {
        let Ok(frame) = encode(MessageType::Binary, &payload(size), ProtocolVersion::V13) else {
            continue;
        };
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("whole", size), &frame, |b, frame| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(ProtocolVersion::V13);
                decoder.feed(black_box(frame));
                decoder.next()
            });
        });

        group.bench_with_input(BenchmarkId::new("chunked", size), &frame, |b, frame| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(ProtocolVersion::V13);
                let mut decoded = None;
                for chunk in frame.chunks(FEED_CHUNK) {
                    decoder.feed(black_box(chunk));
                    if let Ok(Some(message)) = decoder.next() {
                        decoded = Some(message);
                    }
                }
                decoded
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
