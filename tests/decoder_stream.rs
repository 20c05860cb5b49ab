//! Stream decoding properties
//!
//! Checks the parsing contract between the scan list and the sample decoder: the encoded
//! cycle width matches the decoder, K cycles in means K cycles out in scan order, and the
//! way the stream is chunked never changes the result.

use di2008_daq::decoder::{Cycle, SampleDecoder};
use di2008_daq::prelude::*;

fn scan_lists() -> Vec<ScanList> {
    vec![
        ScanList::from_channels([AnalogChannel::new(0, 10.0).unwrap()]).unwrap(),
        ScanList::from_channels([
            Channel::from(AnalogChannel::new(0, 10.0).unwrap()),
            Channel::from(RateChannel::new(5000).unwrap()),
        ])
        .unwrap(),
        ScanList::from_channels([
            Channel::from(DigitalChannel::new(1, Direction::Input).unwrap()),
            Channel::from(ThermocoupleChannel::new(2, ThermocoupleType::T).unwrap()),
            Channel::from(CountChannel::new()),
            Channel::from(DigitalChannel::new(6, Direction::Output).unwrap()),
            Channel::from(AnalogChannel::new(7, 0.5).unwrap()),
        ])
        .unwrap(),
        ScanList::from_channels(
            (0..8)
                .map(|input| Channel::from(AnalogChannel::new(input, 2.5).unwrap()))
                .chain([
                    Channel::from(RateChannel::new(100).unwrap()),
                    Channel::from(CountChannel::new()),
                    Channel::from(DigitalChannel::new(0, Direction::Input).unwrap()),
                ]),
        )
        .unwrap(),
    ]
}

/// Deterministic byte pattern: a small linear congruential generator.
fn stream(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn decode_in_chunks(list: &ScanList, bytes: &[u8], chunk: usize) -> Vec<Cycle> {
    let mut decoder = SampleDecoder::new(list).unwrap();
    bytes
        .chunks(chunk)
        .flat_map(|piece| decoder.feed(piece).collect::<Vec<_>>())
        .collect()
}

#[test]
fn test_encoded_width_matches_decoder() {
    for list in scan_lists() {
        let encoding = list.encode().unwrap();
        let decoder = SampleDecoder::new(&list).unwrap();
        assert_eq!(encoding.cycle_width, decoder.cycle_width());
        assert_eq!(encoding.cycle_width, list.cycle_width());
    }
}

#[test]
fn test_k_cycles_yield_k_tuples_in_scan_order() {
    for (seed, list) in scan_lists().into_iter().enumerate() {
        for k in [0usize, 1, 2, 17] {
            let bytes = stream(k * list.cycle_width(), seed as u32);
            let cycles = decode_in_chunks(&list, &bytes, bytes.len().max(1));

            assert_eq!(cycles.len(), k);
            for (index, cycle) in cycles.iter().enumerate() {
                assert_eq!(cycle.sequence, index as u64);
                assert_eq!(cycle.ids(), list.ids());
            }
        }
    }
}

#[test]
fn test_fragmentation_does_not_change_result() {
    for (seed, list) in scan_lists().into_iter().enumerate() {
        let bytes = stream(25 * list.cycle_width() + 1, 7 + seed as u32);
        let whole = decode_in_chunks(&list, &bytes, bytes.len());

        for chunk in [1, 2, 3, 5, 64] {
            assert_eq!(decode_in_chunks(&list, &bytes, chunk), whole, "chunk size {chunk}");
        }
    }
}

#[test]
fn test_two_slot_scenario() {
    let list = &scan_lists()[1];
    let mut decoder = SampleDecoder::new(list).unwrap();
    let cycle = decoder.feed(&[0x00, 0x40, 0x00, 0x10]).next().unwrap();

    let analog = cycle.samples[0];
    let rate = cycle.samples[1];
    assert_eq!(analog.channel, ChannelId::Analog(0));
    assert!((analog.value.as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(rate.channel, ChannelId::Rate);
    assert!((rate.value.as_f64().unwrap() - 2812.5).abs() < 1e-9);
}

#[test]
fn test_thermocouple_reserved_values_are_faults() {
    let list = ScanList::from_channels([ThermocoupleChannel::new(0, ThermocoupleType::K)
        .unwrap()])
    .unwrap();
    let mut decoder = SampleDecoder::new(&list).unwrap();

    let mut bytes = i16::MIN.to_le_bytes().to_vec();
    bytes.extend(i16::MAX.to_le_bytes());
    bytes.extend(1000i16.to_le_bytes());
    let faults: Vec<Option<Fault>> = decoder
        .feed(&bytes)
        .map(|cycle| cycle.samples[0].fault)
        .collect();

    assert_eq!(
        faults,
        vec![Some(Fault::OpenCircuit), Some(Fault::OutOfRange), None]
    );
}
