//! Per-packet hot-path benchmarks for dccp-transport.
//!
//! - Header encode/decode for a full-size DataAck and a feedback Ack
//! - Option area decode
//! - TFRC throughput equation and average loss interval
//! - Receiver-side loss interval construction
//!
//! Run with: cargo bench --package dccp-transport

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use quanta::Instant;

use dccp_transport::ccid3::equation::throughput;
use dccp_transport::ccid3::interval::{Arrival, IntervalBuilder};
use dccp_transport::ccid3::loss_rate::{LossRateCalculator, NINTERVAL};
use dccp_transport::options::{DccpOption, ElapsedTime, Timestamp, decode_options, encode_options};
use dccp_transport::wire::{Header, PacketType};

fn data_packet(len: usize) -> Header {
    Header::new(PacketType::DataAck, 0x0000_1234_5678)
        .with_ack(0x0000_8765_4321)
        .with_ccval(5)
        .with_data(Bytes::from(vec![0xA5u8; len]))
}

fn feedback_packet() -> Header {
    Header::new(PacketType::Ack, 99).with_ack(1000).with_options(vec![
        ElapsedTime {
            elapsed: Duration::from_micros(730),
        }
        .encode(),
        DccpOption::new(192, vec![0, 0, 0, 10]),
        DccpOption::new(194, vec![0, 1, 0x86, 0xa0]),
    ])
}

// ─── Header ─────────────────────────────────────────────────────────────────

fn bench_header_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_encode");
    for size in [0usize, 512, 1452] {
        let h = data_packet(size);
        group.throughput(Throughput::Bytes(h.encoded_len() as u64));
        group.bench_function(format!("dataack_{size}"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(h.encoded_len());
                black_box(&h).encode(&mut buf).unwrap();
                black_box(buf);
            });
        });
    }
    let fb = feedback_packet();
    group.bench_function("ack_with_options", |b| {
        b.iter(|| black_box(black_box(&fb).to_bytes(1500).unwrap()));
    });
    group.finish();
}

fn bench_header_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_decode");
    for size in [0usize, 512, 1452] {
        let wire = data_packet(size).to_bytes(64 * 1024).unwrap();
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(format!("dataack_{size}"), |b| {
            b.iter(|| black_box(Header::decode(black_box(wire.clone())).unwrap()));
        });
    }
    let fb = feedback_packet().to_bytes(1500).unwrap();
    group.bench_function("ack_with_options", |b| {
        b.iter(|| black_box(Header::decode(black_box(fb.clone())).unwrap()));
    });
    group.finish();
}

fn bench_options(c: &mut Criterion) {
    let opts = vec![
        Timestamp { value: 123_456 }.encode(),
        ElapsedTime {
            elapsed: Duration::from_millis(2),
        }
        .encode(),
        DccpOption::new(193, vec![1u8; 28]),
    ];
    let mut area = BytesMut::new();
    encode_options(&opts, &mut area).unwrap();
    let area = area.freeze();
    c.bench_function("options_decode", |b| {
        b.iter(|| black_box(decode_options(black_box(&area)).unwrap()));
    });
}

// ─── TFRC ───────────────────────────────────────────────────────────────────

fn bench_tfrc(c: &mut Criterion) {
    let mut group = c.benchmark_group("tfrc");
    group.bench_function("throughput_table", |b| {
        b.iter(|| black_box(throughput(1460, Duration::from_millis(80), black_box(250))));
    });
    group.bench_function("throughput_closed_form", |b| {
        b.iter(|| black_box(throughput(1460, Duration::from_millis(80), black_box(250_000))));
    });

    let calc = LossRateCalculator::new(NINTERVAL);
    let lens: Vec<u32> = (0..=NINTERVAL as u32).map(|i| 40 + 7 * i).collect();
    group.bench_function("loss_rate_inv", |b| {
        b.iter(|| black_box(calc.rate_inv(black_box(&lens))));
    });
    group.finish();
}

fn bench_interval_builder(c: &mut Criterion) {
    // 1000 arrivals with every 50th packet missing.
    let base = Instant::now();
    let arrivals: Vec<Arrival> = (0u64..1000)
        .filter(|s| s % 50 != 49)
        .map(|seq| Arrival {
            seq,
            time: base + Duration::from_micros(seq * 100),
            is_data: true,
        })
        .collect();

    let mut group = c.benchmark_group("interval_builder");
    group.throughput(Throughput::Elements(arrivals.len() as u64));
    group.bench_function("1000_arrivals_2pct_loss", |b| {
        b.iter(|| {
            let mut builder = IntervalBuilder::new();
            let mut closed = 0usize;
            for a in &arrivals {
                builder.on_read(*a, Duration::from_millis(5), |_| closed += 1);
            }
            black_box(closed)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_header_encode,
    bench_header_decode,
    bench_options,
    bench_tfrc,
    bench_interval_builder,
);
criterion_main!(benches);
