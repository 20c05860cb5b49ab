//! Serial transport for the DI-2008 USB CDC port
//!
//! Wraps the `serialport` crate and runs the blocking I/O on Tokio's blocking task
//! executor, so a bounded read never stalls the runtime.
//!
//! Port settings: 115200 baud, 8 data bits, no parity, 1 stop bit, no flow control.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default DI-2008 baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial transport for RS-232 / USB-serial instruments.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate
    baud_rate: u32,

    /// The open port (behind Arc<Mutex> so blocking I/O can move to another thread)
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`.
    ///
    /// # Errors
    /// `DaqError::Transport` if the port cannot be opened.
    pub fn open(port_name: &str, baud_rate: u32) -> AppResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                DaqError::Transport(format!(
                    "Failed to open serial port '{port_name}' at {baud_rate} baud: {e}"
                ))
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    /// Whether the port is still open.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| DaqError::Transport(format!("serial port '{}' is closed", self.port_name)))
    }
}

#[async_trait]
impl Transport for SerialAdapter {
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let port = self.port()?;
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.write_all(&bytes)
                .and_then(|()| port.flush())
                .map_err(|e| DaqError::Transport(format!("Failed to write to serial port: {e}")))
        })
        .await
        .map_err(|e| DaqError::Transport(format!("Serial I/O task panicked: {e}")))?
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        let port = self.port()?;

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.set_timeout(timeout)
                .map_err(|e| DaqError::Transport(format!("Failed to set read timeout: {e}")))?;

            let mut buffer = vec![0u8; max_bytes];
            match port.read(&mut buffer) {
                Ok(0) => Err(DaqError::Transport("Unexpected EOF from serial port".into())),
                Ok(n) => {
                    buffer.truncate(n);
                    Ok(buffer)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(DaqError::Transport(format!("Serial read error: {e}"))),
            }
        })
        .await
        .map_err(|e| DaqError::Transport(format!("Serial I/O task panicked: {e}")))?
    }

    async fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn info(&self) -> String {
        format!("SerialAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
