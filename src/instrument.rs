//! DI-2008 instrument
//!
//! [`Instrument`] ties the pieces together: it owns the [`CommandChannel`], the
//! [`AcquisitionLoop`] and the shared [`ValueStore`].
//!
//! ```no_run
//! use di2008_daq::prelude::*;
//!
//! # async fn run() -> AppResult<()> {
//! let config = DaqConfig::load()?;
//! let mut daq = Instrument::open(&config.device).await?;
//!
//! daq.create_scan_list(ScanList::from_channels([
//!     Channel::from(AnalogChannel::new(0, 10.0)?),
//!     Channel::from(ThermocoupleChannel::new(1, ThermocoupleType::K)?),
//! ])?)
//! .await?;
//! daq.start().await?;
//!
//! if let Some(reading) = daq.value(ChannelId::Analog(0)) {
//!     println!("{}", reading.value);
//! }
//!
//! daq.stop().await?;
//! daq.close().await
//! # }
//! ```
//!
//! After the loop reports an error (see [`Instrument::next_error`]) the device may still
//! be streaming. Every operation that writes to the device halts it first;
//! [`Instrument::restart`] is the usual recovery.

use crate::acquisition::{AcquisitionLoop, AcquisitionSettings, AcquisitionState};
use crate::adapters::Transport;
use crate::channel::{ChannelId, Direction};
use crate::command::{CommandChannel, CommandTimeouts};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use crate::protocol::{InfoItem, LedColor};
use crate::scan_list::ScanList;
use crate::store::{Reading, ValueStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Manufacturer reported by `info 0`.
pub const MANUFACTURER: &str = "DATAQ";

/// Product id reported by `info 1`.
pub const PRODUCT_ID: &str = "2008";

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Identification read on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Manufacturer name
    pub manufacturer: String,
    /// Product id
    pub product_id: String,
    /// Firmware revision
    pub firmware: String,
    /// Electronic serial number
    pub serial_number: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} DI-{}, serial number {}, firmware {}",
            self.manufacturer, self.product_id, self.serial_number, self.firmware
        )
    }
}

/// A connected DI-2008.
pub struct Instrument {
    command: CommandChannel,
    acquisition: AcquisitionLoop,
    store: Arc<ValueStore>,
    errors_tx: mpsc::Sender<DaqError>,
    errors_rx: mpsc::Receiver<DaqError>,
    info: DeviceInfo,
}

impl Instrument {
    /// Open the serial port named in `config` and connect.
    ///
    /// # Errors
    /// `InvalidConfiguration` if no port is configured or a value is out of range, then as
    /// [`Instrument::connect`].
    #[cfg(feature = "instrument_serial")]
    pub async fn open(config: &DeviceConfig) -> AppResult<Self> {
        config.validate()?;
        let port = config.port.as_deref().ok_or_else(|| {
            DaqError::InvalidConfiguration("device.port is not configured".to_string())
        })?;
        let adapter = crate::adapters::SerialAdapter::open(port, config.baud_rate)?;
        Self::connect(adapter, config).await
    }

    /// Take over `transport` and identify the device.
    ///
    /// Stops a stream left running by a previous session, reads the device information,
    /// then applies the configured sample rate and LED color.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `config` fails [`DeviceConfig::validate`]; nothing is
    ///   written in that case
    /// - `Protocol` if the device is not a DATAQ 2008; exchange errors as usual
    pub async fn connect(
        transport: impl Transport + 'static,
        config: &DeviceConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        info!(transport = %transport.info(), "connecting");
        let command = CommandChannel::new(transport, CommandTimeouts::from(config));
        command.stop_acquisition().await?;

        let info = DeviceInfo {
            manufacturer: command.query_info(InfoItem::Manufacturer).await?,
            product_id: command.query_info(InfoItem::ProductId).await?,
            firmware: command.query_info(InfoItem::Firmware).await?,
            serial_number: command.query_info(InfoItem::SerialNumber).await?,
        };
        if info.manufacturer != MANUFACTURER || info.product_id != PRODUCT_ID {
            return Err(DaqError::Protocol(format!(
                "expected a {MANUFACTURER} {PRODUCT_ID}, found '{}' '{}'",
                info.manufacturer, info.product_id
            )));
        }

        command.set_sample_rate(config.sample_rate).await?;
        if let Some(color) = config.indicator {
            command.set_indicator(color).await?;
        }

        info!(device = %info, "connected");
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Ok(Self {
            acquisition: AcquisitionLoop::new(command.state(), AcquisitionSettings::from(config)),
            command,
            store: Arc::new(ValueStore::new()),
            errors_tx,
            errors_rx,
            info,
        })
    }

    /// Device identification.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Current acquisition state.
    pub fn state(&self) -> AcquisitionState {
        self.command.state().get()
    }

    /// The active scan list.
    pub fn scan_list(&self) -> Option<Arc<ScanList>> {
        self.command.scan_list()
    }

    /// Transmit `scan_list` to the device and make it active.
    ///
    /// # Errors
    /// - `AcquisitionActive` while acquiring; the active scan list is unchanged
    /// - `EmptyScanList` for an empty list
    pub async fn create_scan_list(&mut self, scan_list: ScanList) -> AppResult<()> {
        self.halt_failed_run().await?;
        self.command.configure(scan_list).await.map(|_| ())
    }

    /// Start acquiring with the active scan list.
    ///
    /// # Errors
    /// `NoScanList` if none was configured; nothing is written in that case.
    pub async fn start(&mut self) -> AppResult<()> {
        self.halt_failed_run().await?;
        let scan_list = self.command.start_acquisition().await?;
        if let Err(e) = self.acquisition.spawn(
            self.command.transport(),
            &scan_list,
            Arc::clone(&self.store),
            self.errors_tx.clone(),
        ) {
            self.command.stop_acquisition().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Configure `scan_list` and start acquiring.
    ///
    /// # Errors
    /// `NoScanList` for an empty list, without touching the device.
    pub async fn start_with(&mut self, scan_list: ScanList) -> AppResult<()> {
        if scan_list.is_empty() {
            return Err(DaqError::NoScanList);
        }
        self.create_scan_list(scan_list).await?;
        self.start().await
    }

    /// Stop acquiring and clear the value store.
    ///
    /// Safe in any state and safe to repeat. The acquisition task has exited when this
    /// returns.
    pub async fn stop(&mut self) -> AppResult<()> {
        self.acquisition.halt().await;
        let result = self.command.stop_acquisition().await;
        self.store.reset();
        info!("acquisition stopped");
        result
    }

    /// Stop, retransmit the active scan list and start again.
    ///
    /// Recovery after `DesyncSuspected` or a device buffer overflow.
    pub async fn restart(&mut self) -> AppResult<()> {
        let scan_list = self.command.scan_list().ok_or(DaqError::NoScanList)?;
        self.stop().await?;
        self.command.configure(ScanList::clone(&scan_list)).await?;
        self.start().await
    }

    /// Latest reading of a channel; `None` before its first sample or when not scanned.
    pub fn value(&self, id: ChannelId) -> Option<Reading> {
        self.store.get(id)
    }

    /// The value store, for sharing with other tasks.
    pub fn store(&self) -> Arc<ValueStore> {
        Arc::clone(&self.store)
    }

    /// Wait for the next error reported by the acquisition loop.
    pub async fn next_error(&mut self) -> Option<DaqError> {
        self.errors_rx.recv().await
    }

    /// Next error reported by the acquisition loop, if one is pending.
    pub fn try_next_error(&mut self) -> Option<DaqError> {
        self.errors_rx.try_recv().ok()
    }

    /// Drive digital output `bit`. Allowed while acquiring.
    ///
    /// # Errors
    /// `DirectionMismatch` unless the bit is configured as an output.
    pub async fn write_digital_output(&mut self, bit: u8, level: bool) -> AppResult<()> {
        self.halt_failed_run().await?;
        self.command.write_digital_output(bit, level).await
    }

    /// Configure the direction of digital `bit`.
    pub async fn set_direction(&mut self, bit: u8, direction: Direction) -> AppResult<()> {
        self.halt_failed_run().await?;
        self.command.set_direction(bit, direction).await
    }

    /// Set the front-panel LED color. Allowed while acquiring.
    pub async fn set_indicator(&mut self, color: LedColor) -> AppResult<()> {
        self.halt_failed_run().await?;
        self.command.set_indicator(color).await
    }

    /// Set the sample rate divisor.
    pub async fn set_sample_rate(&mut self, divisor: u16) -> AppResult<()> {
        self.halt_failed_run().await?;
        self.command.set_sample_rate(divisor).await
    }

    /// Stop acquiring and release the transport.
    pub async fn close(mut self) -> AppResult<()> {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "stop failed while closing");
        }
        self.command.close().await
    }

    /// Halt a loop that ended on its own, so the device stops streaming before the next
    /// configuration exchange.
    async fn halt_failed_run(&mut self) -> AppResult<()> {
        if self.acquisition.is_spawned() && self.state() != AcquisitionState::Running {
            warn!("acquisition ended with an error; stopping the device");
            self.stop().await?;
        }
        Ok(())
    }
}
