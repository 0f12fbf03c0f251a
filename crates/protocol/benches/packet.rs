//! Benchmarks for the packet codec
//!
//! Measures the hot paths of a request/response exchange:
//! - Building a command with mixed scalar fields
//! - Filling a full 60-byte payload
//! - Decoding a received frame

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{MAX_PAYLOAD_SIZE, Packet, PacketType};

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    group.bench_function("spi_init", |b| {
        b.iter(|| {
            let mut pkt = Packet::command(PacketType::SpiInit);
            pkt.set_sequence(black_box(7));
            pkt.append_bytes(&[0, 18, 19, 16, 17]).unwrap();
            pkt.append_u32(black_box(1_000_000)).unwrap();
            pkt
        })
    });

    let data = [0xa5u8; MAX_PAYLOAD_SIZE];
    group.throughput(Throughput::Bytes(MAX_PAYLOAD_SIZE as u64));
    group.bench_function("full_payload", |b| {
        b.iter(|| {
            let mut pkt = Packet::command(PacketType::SpiTransfer);
            pkt.append_bytes(black_box(&data)).unwrap();
            pkt
        })
    });

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let mut pkt = Packet::command(PacketType::AnalogInit);
    pkt.append_bytes(&[2, 1]).unwrap();
    pkt.append_u32(65_535).unwrap();
    pkt.append_u64(1_000).unwrap();
    let frame = pkt.as_bytes().to_vec();

    group.bench_function("analog_init", |b| {
        b.iter(|| {
            let decoded = Packet::decode(black_box(&frame)).unwrap();
            (decoded.read_u32(2).unwrap(), decoded.read_u64(6).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
