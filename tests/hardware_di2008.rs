//! Hardware smoke test for a DI-2008 on a real serial port
//!
//! Run with: DI2008_DEVICE__PORT=/dev/ttyACM0 cargo test --features hardware_tests --test hardware_di2008

#![cfg(feature = "hardware_tests")]

use di2008_daq::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn test_di2008_acquires_analog_input() {
    let config = DaqConfig::load().unwrap();
    if config.device.port.is_none() {
        eprintln!("device.port not configured, skipping");
        return;
    }

    let mut daq = Instrument::open(&config.device).await.unwrap();
    println!("{}", daq.info());

    let list = ScanList::from_channels([AnalogChannel::new(0, 10.0).unwrap()]).unwrap();
    daq.start_with(list).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let reading = daq.value(ChannelId::Analog(0)).expect("no sample after 500 ms");
    println!("analog input 0: {}", reading.value);
    assert!(reading.value.as_f64().unwrap().abs() <= 10.0);

    daq.stop().await.unwrap();
    assert!(daq.value(ChannelId::Analog(0)).is_none());
    daq.close().await.unwrap();
}
