//! # DI-2008 DAQ Library
//!
//! Scan-list protocol engine for DATAQ DI-2008 style data-acquisition instruments. A caller
//! describes the channels to sample, the crate configures the device, runs continuous
//! acquisition in a background task, decodes the unframed binary sample stream and keeps
//! the latest engineering value of every channel available to any number of readers.
//!
//! ## Crate Structure
//!
//! - **`channel`**: Channel variants (analog, thermocouple, rate, count, digital), their
//!   configuration words and raw-sample conversions.
//! - **`scan_list`**: The ordered, validated set of channels and its encoding into device
//!   commands.
//! - **`protocol`**: Device command verbs and acknowledgement validation.
//! - **`adapters`**: The `Transport` trait with serial and mock implementations.
//! - **`command`**: The command channel, request/response exchange over the transport.
//! - **`decoder`**: The stateful sample-stream decoder.
//! - **`store`**: The concurrent latest-value cache.
//! - **`acquisition`**: The background read-decode-publish loop.
//! - **`instrument`**: The `Instrument` facade tying everything together.
//! - **`config`**: Figment-based configuration loading.
//! - **`error`**: The `DaqError` enum.
//! - **`telemetry`**: `tracing-subscriber` initialisation.

pub mod acquisition;
pub mod adapters;
pub mod channel;
pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod instrument;
pub mod protocol;
pub mod scan_list;
pub mod store;
pub mod telemetry;

/// Common imports for driving an instrument.
pub mod prelude {
    pub use crate::acquisition::AcquisitionState;
    pub use crate::adapters::{MockAdapter, Transport};
    pub use crate::channel::{
        AnalogChannel, Channel, ChannelId, CountChannel, DigitalChannel, Direction, Fault,
        FilterMode, RateChannel, TemperatureUnit, ThermocoupleChannel, ThermocoupleType, Value,
    };
    pub use crate::config::{DaqConfig, DeviceConfig};
    pub use crate::error::{AppResult, DaqError};
    pub use crate::instrument::{DeviceInfo, Instrument};
    pub use crate::protocol::LedColor;
    pub use crate::scan_list::ScanList;
    pub use crate::store::Reading;
}
