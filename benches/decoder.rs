//! Criterion benchmarks for the sample-decoder hot path.
//!
//! The acquisition loop feeds every transport read through the decoder, so its throughput
//! bounds the scan rates the crate can keep up with.
//!
//! Run with: cargo bench --bench decoder

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use di2008_daq::channel::{
    AnalogChannel, Channel, CountChannel, DigitalChannel, Direction, RateChannel,
    ThermocoupleChannel, ThermocoupleType,
};
use di2008_daq::decoder::SampleDecoder;
use di2008_daq::scan_list::ScanList;
use di2008_daq::store::ValueStore;

fn full_scan_list() -> ScanList {
    let mut channels: Vec<Channel> = (0..6)
        .map(|input| AnalogChannel::new(input, 10.0).unwrap().into())
        .collect();
    channels.push(ThermocoupleChannel::new(6, ThermocoupleType::K).unwrap().into());
    channels.push(ThermocoupleChannel::new(7, ThermocoupleType::J).unwrap().into());
    channels.push(RateChannel::new(1000).unwrap().into());
    channels.push(CountChannel::new().into());
    channels.push(DigitalChannel::new(0, Direction::Input).unwrap().into());
    ScanList::from_channels(channels).unwrap()
}

/// Decode throughput for different transport read sizes.
fn decode_throughput(c: &mut Criterion) {
    let list = full_scan_list();
    let bytes: Vec<u8> = (0..list.cycle_width() * 1000).map(|i| (i * 31) as u8).collect();

    let mut group = c.benchmark_group("decoder_feed");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    for chunk in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = SampleDecoder::new(&list).unwrap();
                let mut cycles = 0usize;
                for piece in bytes.chunks(chunk) {
                    cycles += decoder.feed(black_box(piece)).count();
                }
                black_box(cycles)
            });
        });
    }
    group.finish();
}

/// Decode plus publish, as done by the acquisition loop.
fn decode_and_publish(c: &mut Criterion) {
    let list = full_scan_list();
    let bytes: Vec<u8> = (0..list.cycle_width() * 1000).map(|i| (i * 17) as u8).collect();
    let store = ValueStore::new();
    store.activate(list.ids());

    c.bench_function("decode_and_publish_1000_cycles", |b| {
        b.iter(|| {
            let mut decoder = SampleDecoder::new(&list).unwrap();
            for cycle in decoder.feed(black_box(&bytes)) {
                store.publish(&cycle);
            }
        });
    });
}

criterion_group!(benches, decode_throughput, decode_and_publish);
criterion_main!(benches);
