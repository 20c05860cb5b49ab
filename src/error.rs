//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, for every layer of the
//! scan-list engine. Using the `thiserror` crate, it provides a centralized and consistent
//! way to report what went wrong, from a bad channel parameter caught at construction time
//! to a broken serial link in the middle of an acquisition.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups its variants by where they originate:
//!
//! - **Configuration**: `InvalidConfiguration` is raised by channel constructors and never
//!   reaches the device. `Config` wraps figment errors from loading configuration files.
//! - **Scan-list assembly**: `ScanListFull`, `DuplicateSlot` and `EmptyScanList` are local,
//!   non-fatal errors. The caller fixes the scan list and retries.
//! - **Sequencing**: `AcquisitionActive`, `NoScanList` and `DirectionMismatch` mean the
//!   operation was issued in the wrong state. Nothing was written to the transport.
//! - **Command exchange**: `DeviceTimeout` and `Protocol` indicate a failed handshake with
//!   the device. They are not retried automatically.
//! - **Stream integrity**: `DesyncSuspected` is reported by the acquisition loop when the
//!   unframed sample stream can no longer be trusted to be aligned.
//! - **Transport**: `Transport` and `Io` are propagated from the byte-stream collaborator
//!   and always terminate a running acquisition.

use crate::channel::ChannelId;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the scan-list engine, the command channel and the acquisition loop.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid channel configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scan list is full ({capacity} slots)")]
    ScanListFull { capacity: usize },

    #[error("Channel {0} is already in the scan list")]
    DuplicateSlot(ChannelId),

    #[error("Scan list contains no channels")]
    EmptyScanList,

    #[error("Acquisition is active; stop it before reconfiguring the device")]
    AcquisitionActive,

    #[error("No scan list has been configured")]
    NoScanList,

    #[error("Digital bit {bit} is not configured as an output")]
    DirectionMismatch { bit: u8 },

    #[error("No acknowledgement for '{command}' within {timeout:?}")]
    DeviceTimeout { command: String, timeout: Duration },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Sample stream desynchronized: {buffered} byte(s) of a {cycle_width}-byte cycle stalled")]
    DesyncSuspected { buffered: usize, cycle_width: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// Whether the caller can fix the problem locally and retry.
    ///
    /// Configuration, assembly and sequencing errors never touched the device and are
    /// recoverable. Link failures (timeouts, protocol violations, transport errors and a
    /// desynchronized stream) are not: the session has to be stopped or reopened first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::InvalidConfiguration(_)
                | DaqError::ScanListFull { .. }
                | DaqError::DuplicateSlot(_)
                | DaqError::EmptyScanList
                | DaqError::AcquisitionActive
                | DaqError::NoScanList
                | DaqError::DirectionMismatch { .. }
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_errors_are_recoverable() {
        assert!(DaqError::EmptyScanList.is_recoverable());
        assert!(DaqError::ScanListFull { capacity: 11 }.is_recoverable());
        assert!(DaqError::DuplicateSlot(ChannelId::Rate).is_recoverable());
        assert!(DaqError::DirectionMismatch { bit: 3 }.is_recoverable());
    }

    #[test]
    fn link_errors_are_not_recoverable() {
        let timeout = DaqError::DeviceTimeout {
            command: "slist 0 0".into(),
            timeout: Duration::from_millis(500),
        };
        assert!(!timeout.is_recoverable());
        assert!(!DaqError::Protocol("bad echo".into()).is_recoverable());
        assert!(!DaqError::Transport("unplugged".into()).is_recoverable());
        assert!(!DaqError::DesyncSuspected {
            buffered: 3,
            cycle_width: 4
        }
        .is_recoverable());
    }

    #[test]
    fn messages_name_the_offending_item() {
        let err = DaqError::DuplicateSlot(ChannelId::Analog(2));
        assert!(err.to_string().contains("analog input 2"));

        let err = DaqError::DeviceTimeout {
            command: "info 0".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("info 0"));
    }
}
