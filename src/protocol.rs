//! DI-2008 command protocol
//!
//! Protocol Overview:
//! - Format: ASCII verb plus space separated decimal arguments
//! - Terminator: CR (`\r`) on commands and responses
//! - Acknowledgement: the device echoes configuration commands verbatim;
//!   `info N` answers with `info N <value>`
//! - NUL bytes may precede a response and are discarded
//! - After `start` the device switches to an unframed binary sample stream; the
//!   stream itself is the acknowledgement
//! - `stop` is honoured mid-stream; the bytes already in flight must be drained
//!
//! This module only builds and checks strings. The exchange itself lives in
//! [`CommandChannel`](crate::command::CommandChannel).

use crate::channel::FilterMode;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command terminator.
pub const TERMINATOR: u8 = b'\r';

/// Valid `srate` divisors.
pub const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u16> = 4..=2232;

/// Device information items answered by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoItem {
    /// Manufacturer name, `DATAQ`
    Manufacturer,
    /// Product id, `2008`
    ProductId,
    /// Firmware revision
    Firmware,
    /// Electronic serial number
    SerialNumber,
}

impl InfoItem {
    /// Argument of the `info` command.
    pub fn code(self) -> u8 {
        match self {
            InfoItem::Manufacturer => 0,
            InfoItem::ProductId => 1,
            InfoItem::Firmware => 2,
            InfoItem::SerialNumber => 6,
        }
    }
}

/// Colors of the front-panel LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedColor {
    /// Off
    Black,
    /// Blue
    Blue,
    /// Green
    Green,
    /// Cyan
    Cyan,
    /// Red
    Red,
    /// Magenta
    Magenta,
    /// Yellow
    Yellow,
    /// White
    White,
}

impl LedColor {
    /// Argument of the `led` command.
    pub fn code(self) -> u8 {
        match self {
            LedColor::Black => 0,
            LedColor::Blue => 1,
            LedColor::Green => 2,
            LedColor::Cyan => 3,
            LedColor::Red => 4,
            LedColor::Magenta => 5,
            LedColor::Yellow => 6,
            LedColor::White => 7,
        }
    }
}

impl FromStr for LedColor {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "black" => Ok(LedColor::Black),
            "blue" => Ok(LedColor::Blue),
            "green" => Ok(LedColor::Green),
            "cyan" => Ok(LedColor::Cyan),
            "red" => Ok(LedColor::Red),
            "magenta" => Ok(LedColor::Magenta),
            "yellow" => Ok(LedColor::Yellow),
            "white" => Ok(LedColor::White),
            other => Err(DaqError::InvalidConfiguration(format!(
                "LED color '{other}' is not valid, expected one of black, blue, green, cyan, red, magenta, yellow, white"
            ))),
        }
    }
}

/// Device packet size (`ps` argument): bytes the device buffers before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// 16 bytes
    Bytes16,
    /// 32 bytes
    Bytes32,
    /// 64 bytes
    Bytes64,
    /// 128 bytes
    Bytes128,
}

impl PacketSize {
    /// Packet size suited to a scan list of `slots` entries.
    pub fn for_slots(slots: usize) -> Self {
        match slots {
            0..=7 => PacketSize::Bytes16,
            8..=15 => PacketSize::Bytes32,
            16..=31 => PacketSize::Bytes64,
            _ => PacketSize::Bytes128,
        }
    }

    /// Bytes per packet.
    pub fn bytes(self) -> usize {
        match self {
            PacketSize::Bytes16 => 16,
            PacketSize::Bytes32 => 32,
            PacketSize::Bytes64 => 64,
            PacketSize::Bytes128 => 128,
        }
    }

    fn code(self) -> u8 {
        match self {
            PacketSize::Bytes16 => 0,
            PacketSize::Bytes32 => 1,
            PacketSize::Bytes64 => 2,
            PacketSize::Bytes128 => 3,
        }
    }
}

/// How the device acknowledges a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// A CR-terminated echo (or `info` answer) follows
    Echo,
    /// The binary sample stream starts; no text reply
    Stream,
    /// The stream stops; remaining bytes are drained until the line is quiet
    Drain,
}

/// A command understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `slist offset config`: place a configuration word at a scan-list position
    ScanListEntry {
        /// Position in the scan list
        offset: u8,
        /// Channel configuration word
        config: u16,
    },
    /// `filter input mode`
    Filter {
        /// Analog input
        input: u8,
        /// Filter mode
        mode: FilterMode,
    },
    /// `dec n`: filter decimation, device wide
    Decimation(u16),
    /// `ffl n`: rate input moving-average length
    RateFilter(u8),
    /// `ps n`
    PacketSize(PacketSize),
    /// `srate n`: sample rate divisor
    SampleRate(u16),
    /// `endo mask`: bits set in the mask are outputs
    DigitalDirection(u8),
    /// `dout mask`: drive the output bits
    DigitalOutput(u8),
    /// `led n`
    Led(LedColor),
    /// `info n`
    Info(InfoItem),
    /// `start`
    Start,
    /// `stop`
    Stop,
}

impl Command {
    /// Whether the command changes the acquisition setup and is therefore refused while
    /// the device is streaming.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Command::DigitalOutput(_) | Command::Led(_) | Command::Stop
        )
    }

    /// How the device acknowledges this command.
    pub fn acknowledgement(&self) -> Acknowledgement {
        match self {
            Command::Start => Acknowledgement::Stream,
            Command::Stop => Acknowledgement::Drain,
            _ => Acknowledgement::Echo,
        }
    }

    /// Wire bytes including the terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }

    /// Check a response line against this command.
    ///
    /// Returns the payload: the echoed text for configuration commands, the answer for
    /// `info` queries.
    ///
    /// # Errors
    /// `Protocol` if the response is not the expected acknowledgement.
    pub fn validate_response(&self, response: &str) -> AppResult<String> {
        let expected = self.to_string();
        let response = clean_response(response);

        match self {
            Command::Info(_) => response
                .strip_prefix(expected.as_str())
                .map(|answer| answer.trim().to_string())
                .ok_or_else(|| {
                    DaqError::Protocol(format!(
                        "expected answer to '{expected}', got '{}'",
                        response.escape_default()
                    ))
                }),
            _ if response == expected => Ok(response.to_string()),
            _ => Err(DaqError::Protocol(format!(
                "expected echo '{expected}', got '{}'",
                response.escape_default()
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ScanListEntry { offset, config } => write!(f, "slist {offset} {config}"),
            Command::Filter { input, mode } => write!(f, "filter {input} {}", mode.code()),
            Command::Decimation(n) => write!(f, "dec {n}"),
            Command::RateFilter(n) => write!(f, "ffl {n}"),
            Command::PacketSize(size) => write!(f, "ps {}", size.code()),
            Command::SampleRate(n) => write!(f, "srate {n}"),
            Command::DigitalDirection(mask) => write!(f, "endo {mask}"),
            Command::DigitalOutput(mask) => write!(f, "dout {mask}"),
            Command::Led(color) => write!(f, "led {}", color.code()),
            Command::Info(item) => write!(f, "info {}", item.code()),
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
        }
    }
}

/// Strip NUL padding and surrounding whitespace from a response line.
fn clean_response(response: &str) -> &str {
    response.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}
