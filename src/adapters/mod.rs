//! Byte-stream transports
//!
//! The scan-list engine treats the serial link as an injected collaborator. Anything that
//! can write bytes, read bytes with a bounded wait and close can carry the protocol.
//!
//! - [`SerialAdapter`] - the DI-2008's USB CDC serial port (feature `instrument_serial`)
//! - [`MockAdapter`] - a scripted in-memory device for tests and demos

use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

pub mod mock_adapter;
pub use mock_adapter::{MockAdapter, MockDevice};

/// Byte-oriented duplex connection to the instrument.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `bytes`.
    ///
    /// Failures are reported as `DaqError::Transport`.
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Read up to `max_bytes`, waiting at most `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time. A timeout is not an error.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>>;

    /// Release the underlying connection.
    async fn close(&mut self) -> AppResult<()>;

    /// Human-readable description for logs.
    fn info(&self) -> String {
        "transport".to_string()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        (**self).write(bytes).await
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        (**self).read(max_bytes, timeout).await
    }

    async fn close(&mut self) -> AppResult<()> {
        (**self).close().await
    }

    fn info(&self) -> String {
        (**self).info()
    }
}
