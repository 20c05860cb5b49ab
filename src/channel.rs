//! Channel Model
//!
//! Typed descriptors for every input the DI-2008 can place in its scan list, together with
//! the conversion from a raw slot window to an engineering value.
//!
//! The channel set is fixed by the firmware, so channels are a closed enum dispatched with
//! `match` rather than an open trait hierarchy:
//!
//! - [`AnalogChannel`] - differential voltage input, ±10 mV to ±50 V
//! - [`ThermocoupleChannel`] - the same physical input linearised for a junction type
//! - [`RateChannel`] - the pulse-rate (frequency) input
//! - [`CountChannel`] - the pulse counter
//! - [`DigitalChannel`] - one bit of the digital port
//!
//! Channels are pure data. They know how to describe themselves to the device
//! ([`Channel::configuration_word`], [`Channel::setup_commands`]) and how to decode their
//! own slot ([`Channel::decode`]); they never hold the latest value. That lives in the
//! [`ValueStore`](crate::store::ValueStore).
//!
//! # Example
//!
//! ```
//! use di2008_daq::channel::{AnalogChannel, Channel, FilterMode, RateChannel};
//!
//! # fn main() -> Result<(), di2008_daq::error::DaqError> {
//! let analog: Channel = AnalogChannel::new(0, 10.0)?
//!     .with_filter(FilterMode::Average, 10)?
//!     .into();
//! let rate: Channel = RateChannel::new(5000)?.into();
//!
//! assert_eq!(analog.width(), 2);
//! assert_eq!(rate.configuration_word(), 0x0409);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::protocol::Command;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of differential analog inputs.
pub const ANALOG_INPUTS: u8 = 8;

/// Number of addressable digital bits.
pub const DIGITAL_BITS: u8 = 8;

/// Byte width of every word-sized slot (analog, thermocouple, rate, count).
pub const WORD_WIDTH: usize = 2;

/// Byte width of the combined digital slot.
pub const DIGITAL_WIDTH: usize = 1;

/// Raw value reported by a thermocouple input whose reading is outside the sensor range.
pub const TC_OUT_OF_RANGE: i16 = i16::MAX;

/// Raw value reported by an open or disconnected thermocouple.
pub const TC_OPEN_CIRCUIT: i16 = i16::MIN;

const MODE_BIT: u16 = 12;
const SCALE_SHIFT: u16 = 8;

/// Supported analog ranges (±volts) and their 4-bit range code.
///
/// Bit 3 of the code is the "range" bit (×100), bits 0-2 are the scale index.
const ANALOG_RANGES: [(f64, u16); 12] = [
    (0.5, 0x0),
    (0.25, 0x1),
    (0.1, 0x2),
    (0.05, 0x3),
    (0.025, 0x4),
    (0.01, 0x5),
    (50.0, 0x8),
    (25.0, 0x9),
    (10.0, 0xA),
    (5.0, 0xB),
    (2.5, 0xC),
    (1.0, 0xD),
];

/// Full-scale rate ranges (Hz) and their `slist` rate code.
const RATE_RANGES: [(u32, u16); 12] = [
    (50_000, 1),
    (20_000, 2),
    (10_000, 3),
    (5_000, 4),
    (2_000, 5),
    (1_000, 6),
    (500, 7),
    (200, 8),
    (100, 9),
    (50, 10),
    (20, 11),
    (10, 12),
];

const DIGITAL_CONFIGURATION: u16 = 0x8;
const RATE_CONFIGURATION: u16 = 0x9;
const COUNT_CONFIGURATION: u16 = 0xA;

/// Default decimation applied by the device filter.
pub const DEFAULT_DECIMATION: u16 = 10;

/// Default moving-average length of the rate input.
pub const DEFAULT_RATE_FILTER: u8 = 32;

/// Stable identity of a channel within one scan list.
///
/// A thermocouple occupies an analog input, so it shares the `Analog` identity space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum ChannelId {
    /// Analog input 0-7 (voltage or thermocouple)
    Analog(u8),
    /// The pulse-rate input
    Rate,
    /// The pulse counter
    Count,
    /// Digital port bit 0-7
    Digital(u8),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Analog(input) => write!(f, "analog input {input}"),
            ChannelId::Rate => write!(f, "rate input"),
            ChannelId::Count => write!(f, "count input"),
            ChannelId::Digital(bit) => write!(f, "digital bit {bit}"),
        }
    }
}

/// On-device filter applied to analog and thermocouple inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Report the last converted point of each decimation window
    #[default]
    LastPoint,
    /// Running average over the decimation window
    Average,
    /// Maximum over the decimation window
    Maximum,
    /// Minimum over the decimation window
    Minimum,
}

impl FilterMode {
    /// Argument of the `filter` command.
    pub fn code(self) -> u8 {
        match self {
            FilterMode::LastPoint => 0,
            FilterMode::Average => 1,
            FilterMode::Maximum => 2,
            FilterMode::Minimum => 3,
        }
    }
}

/// Filter mode plus the decimation factor it runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Filter mode
    pub mode: FilterMode,
    /// Samples per reported value (1-32767)
    pub decimation: u16,
}

impl Filter {
    /// Validate a filter setting.
    pub fn new(mode: FilterMode, decimation: u16) -> AppResult<Self> {
        if !(1..=32767).contains(&decimation) {
            return Err(DaqError::InvalidConfiguration(format!(
                "filter decimation must be between 1 and 32767, got {decimation}"
            )));
        }
        Ok(Self { mode, decimation })
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            mode: FilterMode::LastPoint,
            decimation: DEFAULT_DECIMATION,
        }
    }
}

/// Thermocouple junction types supported by the linearisation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermocoupleType {
    /// Type B
    B,
    /// Type E
    E,
    /// Type J
    J,
    /// Type K
    K,
    /// Type N
    N,
    /// Type R
    R,
    /// Type S
    S,
    /// Type T
    T,
}

impl ThermocoupleType {
    fn index(self) -> u16 {
        match self {
            ThermocoupleType::B => 0,
            ThermocoupleType::E => 1,
            ThermocoupleType::J => 2,
            ThermocoupleType::K => 3,
            ThermocoupleType::N => 4,
            ThermocoupleType::R => 5,
            ThermocoupleType::S => 6,
            ThermocoupleType::T => 7,
        }
    }

    /// Slope and offset of the linear fit, in °C per count and °C.
    fn coefficients(self) -> (f64, f64) {
        match self {
            ThermocoupleType::B => (0.023956, 1035.0),
            ThermocoupleType::E => (0.018311, 400.0),
            ThermocoupleType::J => (0.021515, 495.0),
            ThermocoupleType::K => (0.023987, 586.0),
            ThermocoupleType::N => (0.022888, 550.0),
            ThermocoupleType::R => (0.02774, 859.0),
            ThermocoupleType::S => (0.02774, 859.0),
            ThermocoupleType::T => (0.009155, 100.0),
        }
    }
}

impl FromStr for ThermocoupleType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "b" => Ok(ThermocoupleType::B),
            "e" => Ok(ThermocoupleType::E),
            "j" => Ok(ThermocoupleType::J),
            "k" => Ok(ThermocoupleType::K),
            "n" => Ok(ThermocoupleType::N),
            "r" => Ok(ThermocoupleType::R),
            "s" => Ok(ThermocoupleType::S),
            "t" => Ok(ThermocoupleType::T),
            other => Err(DaqError::InvalidConfiguration(format!(
                "unrecognized thermocouple type '{other}', expected one of B E J K N R S T"
            ))),
        }
    }
}

/// Unit thermocouple readings are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    /// Degrees Celsius
    #[default]
    Celsius,
    /// Degrees Fahrenheit
    Fahrenheit,
    /// Kelvin
    Kelvin,
}

impl TemperatureUnit {
    fn convert_celsius(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            TemperatureUnit::Kelvin => celsius + 273.15,
        }
    }
}

/// Direction of a digital port bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Bit is read by the scan list
    Input,
    /// Bit is driven by `dout`
    Output,
}

/// Fault reported alongside an invalid reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Thermocouple open or not connected
    OpenCircuit,
    /// Reading outside the sensor's measurement range
    OutOfRange,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::OpenCircuit => write!(f, "open circuit"),
            Fault::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// Engineering value decoded from one slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Volts
    Volts(f64),
    /// Temperature in the channel's configured unit
    Temperature(f64, TemperatureUnit),
    /// Frequency in Hz
    Hertz(f64),
    /// Raw pulse count
    Counts(u16),
    /// Digital level
    Level(bool),
    /// No valid reading; see the accompanying fault
    Invalid,
}

impl Value {
    /// Numeric view of the value, `None` for [`Value::Invalid`].
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Volts(v) | Value::Hertz(v) | Value::Temperature(v, _) => Some(v),
            Value::Counts(c) => Some(f64::from(c)),
            Value::Level(level) => Some(if level { 1.0 } else { 0.0 }),
            Value::Invalid => None,
        }
    }

    /// Whether a valid value is present.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Volts(v) => write!(f, "{v:.4} V"),
            Value::Temperature(t, TemperatureUnit::Celsius) => write!(f, "{t:.2} °C"),
            Value::Temperature(t, TemperatureUnit::Fahrenheit) => write!(f, "{t:.2} °F"),
            Value::Temperature(t, TemperatureUnit::Kelvin) => write!(f, "{t:.2} K"),
            Value::Hertz(hz) => write!(f, "{hz:.4} Hz"),
            Value::Counts(c) => write!(f, "{c} counts"),
            Value::Level(level) => write!(f, "{}", if *level { "high" } else { "low" }),
            Value::Invalid => write!(f, "invalid"),
        }
    }
}

fn check_input(input: u8) -> AppResult<()> {
    if input >= ANALOG_INPUTS {
        return Err(DaqError::InvalidConfiguration(format!(
            "analog input {input} is out of range, expected 0 to {}",
            ANALOG_INPUTS - 1
        )));
    }
    Ok(())
}

fn signed_word(window: &[u8]) -> Option<i16> {
    match window {
        [lo, hi, ..] => Some(i16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

fn unsigned_word(window: &[u8]) -> Option<u16> {
    match window {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Differential voltage input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogChannel {
    input: u8,
    range: f64,
    range_code: u16,
    filter: Filter,
}

impl AnalogChannel {
    /// Create a voltage input on `input` (0-7) with a ±`range` volt span.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the input is out of range or `range` is not one of
    /// 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1, 2.5, 5, 10, 25, 50.
    pub fn new(input: u8, range: f64) -> AppResult<Self> {
        check_input(input)?;
        let (range, range_code) = ANALOG_RANGES
            .iter()
            .copied()
            .find(|(r, _)| (r - range).abs() < 1e-9)
            .ok_or_else(|| {
                let valid: Vec<String> =
                    ANALOG_RANGES.iter().map(|(r, _)| r.to_string()).collect();
                DaqError::InvalidConfiguration(format!(
                    "analog range {range} is not supported, expected one of {}",
                    valid.join(", ")
                ))
            })?;

        Ok(Self {
            input,
            range,
            range_code,
            filter: Filter::default(),
        })
    }

    /// Apply an on-device filter.
    pub fn with_filter(mut self, mode: FilterMode, decimation: u16) -> AppResult<Self> {
        self.filter = Filter::new(mode, decimation)?;
        Ok(self)
    }

    /// Analog input index.
    pub fn input(&self) -> u8 {
        self.input
    }

    /// Span in ±volts.
    pub fn range(&self) -> f64 {
        self.range
    }

    /// Configured filter.
    pub fn filter(&self) -> Filter {
        self.filter
    }

    fn configuration_word(&self) -> u16 {
        u16::from(self.input) | (self.range_code << SCALE_SHIFT)
    }

    fn decode(&self, raw: i16) -> Value {
        Value::Volts(self.range * f64::from(raw) / 32768.0)
    }
}

/// Analog input linearised for a thermocouple junction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermocoupleChannel {
    input: u8,
    kind: ThermocoupleType,
    unit: TemperatureUnit,
    filter: Filter,
}

impl ThermocoupleChannel {
    /// Create a thermocouple input, reporting °C.
    pub fn new(input: u8, kind: ThermocoupleType) -> AppResult<Self> {
        check_input(input)?;
        Ok(Self {
            input,
            kind,
            unit: TemperatureUnit::Celsius,
            filter: Filter::default(),
        })
    }

    /// Report readings in `unit`.
    pub fn with_unit(mut self, unit: TemperatureUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Apply an on-device filter.
    pub fn with_filter(mut self, mode: FilterMode, decimation: u16) -> AppResult<Self> {
        self.filter = Filter::new(mode, decimation)?;
        Ok(self)
    }

    /// Analog input index.
    pub fn input(&self) -> u8 {
        self.input
    }

    /// Junction type.
    pub fn kind(&self) -> ThermocoupleType {
        self.kind
    }

    /// Reporting unit.
    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Configured filter.
    pub fn filter(&self) -> Filter {
        self.filter
    }

    fn configuration_word(&self) -> u16 {
        u16::from(self.input) | (1 << MODE_BIT) | (self.kind.index() << SCALE_SHIFT)
    }

    fn decode(&self, raw: i16) -> (Value, Option<Fault>) {
        match raw {
            TC_OUT_OF_RANGE => (Value::Invalid, Some(Fault::OutOfRange)),
            TC_OPEN_CIRCUIT => (Value::Invalid, Some(Fault::OpenCircuit)),
            raw => {
                let (m, b) = self.kind.coefficients();
                let celsius = f64::from(raw) * m + b;
                (Value::Temperature(self.unit.convert_celsius(celsius), self.unit), None)
            }
        }
    }
}

/// Pulse-rate (frequency) input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChannel {
    range_hz: u32,
    rate_code: u16,
    filter_samples: u8,
}

impl RateChannel {
    /// Create the rate input with a full-scale range of `range_hz`.
    ///
    /// # Errors
    /// `InvalidConfiguration` unless `range_hz` is one of 10, 20, 50, 100, 200, 500,
    /// 1000, 2000, 5000, 10000, 20000 or 50000.
    pub fn new(range_hz: u32) -> AppResult<Self> {
        let rate_code = RATE_RANGES
            .iter()
            .find(|(hz, _)| *hz == range_hz)
            .map(|(_, code)| *code)
            .ok_or_else(|| {
                let valid: Vec<String> = RATE_RANGES.iter().map(|(hz, _)| hz.to_string()).collect();
                DaqError::InvalidConfiguration(format!(
                    "rate range {range_hz} Hz is not supported, expected one of {}",
                    valid.join(", ")
                ))
            })?;

        Ok(Self {
            range_hz,
            rate_code,
            filter_samples: DEFAULT_RATE_FILTER,
        })
    }

    /// Set the moving-average length of the rate measurement (1-64).
    pub fn with_filter_samples(mut self, samples: u8) -> AppResult<Self> {
        if !(1..=64).contains(&samples) {
            return Err(DaqError::InvalidConfiguration(format!(
                "rate filter samples must be between 1 and 64, got {samples}"
            )));
        }
        self.filter_samples = samples;
        Ok(self)
    }

    /// Full-scale range in Hz.
    pub fn range_hz(&self) -> u32 {
        self.range_hz
    }

    /// Moving-average length.
    pub fn filter_samples(&self) -> u8 {
        self.filter_samples
    }

    fn configuration_word(&self) -> u16 {
        (self.rate_code << SCALE_SHIFT) | RATE_CONFIGURATION
    }

    fn decode(&self, raw: i16) -> Value {
        Value::Hertz(f64::from(self.range_hz) * (f64::from(raw) + 32768.0) / 65536.0)
    }
}

/// Pulse counter input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountChannel;

impl CountChannel {
    /// Create the count input.
    pub fn new() -> Self {
        Self
    }
}

/// One bit of the digital port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalChannel {
    bit: u8,
    direction: Direction,
}

impl DigitalChannel {
    /// Create a digital channel on `bit` (0-7).
    pub fn new(bit: u8, direction: Direction) -> AppResult<Self> {
        if bit >= DIGITAL_BITS {
            return Err(DaqError::InvalidConfiguration(format!(
                "digital bit {bit} is out of range, expected 0 to {}",
                DIGITAL_BITS - 1
            )));
        }
        Ok(Self { bit, direction })
    }

    /// Bit position.
    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Configured direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Extract this bit from the shared digital byte.
    pub fn level(&self, byte: u8) -> bool {
        (byte >> self.bit) & 1 == 1
    }
}

/// A scannable input of the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Channel {
    /// Voltage input
    Analog(AnalogChannel),
    /// Thermocouple input
    Thermocouple(ThermocoupleChannel),
    /// Pulse-rate input
    Rate(RateChannel),
    /// Pulse counter
    Count(CountChannel),
    /// Digital port bit
    Digital(DigitalChannel),
}

impl Channel {
    /// Identity of the channel within a scan list.
    pub fn id(&self) -> ChannelId {
        match self {
            Channel::Analog(ch) => ChannelId::Analog(ch.input),
            Channel::Thermocouple(ch) => ChannelId::Analog(ch.input),
            Channel::Rate(_) => ChannelId::Rate,
            Channel::Count(_) => ChannelId::Count,
            Channel::Digital(ch) => ChannelId::Digital(ch.bit),
        }
    }

    /// Bytes this channel occupies in a scan cycle.
    ///
    /// Digital channels share a single byte; the scan list accounts for it once.
    pub fn width(&self) -> usize {
        match self {
            Channel::Digital(_) => DIGITAL_WIDTH,
            _ => WORD_WIDTH,
        }
    }

    /// Argument of this channel's `slist` entry.
    pub fn configuration_word(&self) -> u16 {
        match self {
            Channel::Analog(ch) => ch.configuration_word(),
            Channel::Thermocouple(ch) => ch.configuration_word(),
            Channel::Rate(ch) => ch.configuration_word(),
            Channel::Count(_) => COUNT_CONFIGURATION,
            Channel::Digital(_) => DIGITAL_CONFIGURATION,
        }
    }

    /// Per-channel commands sent after the scan list entries.
    ///
    /// The `dec` decimation is device-wide and is emitted once by the scan list.
    pub fn setup_commands(&self) -> Vec<Command> {
        match self {
            Channel::Analog(AnalogChannel { input, filter, .. })
            | Channel::Thermocouple(ThermocoupleChannel { input, filter, .. }) => {
                vec![Command::Filter {
                    input: *input,
                    mode: filter.mode,
                }]
            }
            Channel::Rate(ch) => vec![Command::RateFilter(ch.filter_samples)],
            Channel::Count(_) | Channel::Digital(_) => Vec::new(),
        }
    }

    /// On-device filter, for inputs that have one.
    pub fn filter(&self) -> Option<Filter> {
        match self {
            Channel::Analog(ch) => Some(ch.filter),
            Channel::Thermocouple(ch) => Some(ch.filter),
            _ => None,
        }
    }

    /// Decode this channel's byte window into an engineering value and a fault flag.
    ///
    /// A window shorter than [`Channel::width`] decodes as [`Value::Invalid`].
    pub fn decode(&self, window: &[u8]) -> (Value, Option<Fault>) {
        match self {
            Channel::Analog(ch) => match signed_word(window) {
                Some(raw) => (ch.decode(raw), None),
                None => (Value::Invalid, None),
            },
            Channel::Thermocouple(ch) => match signed_word(window) {
                Some(raw) => ch.decode(raw),
                None => (Value::Invalid, None),
            },
            Channel::Rate(ch) => match signed_word(window) {
                Some(raw) => (ch.decode(raw), None),
                None => (Value::Invalid, None),
            },
            Channel::Count(_) => match unsigned_word(window) {
                Some(count) => (Value::Counts(count), None),
                None => (Value::Invalid, None),
            },
            Channel::Digital(ch) => match window.first() {
                Some(byte) => (Value::Level(ch.level(*byte)), None),
                None => (Value::Invalid, None),
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Analog(ch) => write!(f, "analog input {}, range ±{}V", ch.input, ch.range),
            Channel::Thermocouple(ch) => {
                write!(f, "analog input {}, thermocouple type {:?}", ch.input, ch.kind)
            }
            Channel::Rate(ch) => write!(f, "rate input, {}Hz", ch.range_hz),
            Channel::Count(_) => write!(f, "count input"),
            Channel::Digital(ch) => write!(f, "digital bit {} ({:?})", ch.bit, ch.direction),
        }
    }
}

impl From<AnalogChannel> for Channel {
    fn from(value: AnalogChannel) -> Self {
        Channel::Analog(value)
    }
}

impl From<ThermocoupleChannel> for Channel {
    fn from(value: ThermocoupleChannel) -> Self {
        Channel::Thermocouple(value)
    }
}

impl From<RateChannel> for Channel {
    fn from(value: RateChannel) -> Self {
        Channel::Rate(value)
    }
}

impl From<CountChannel> for Channel {
    fn from(value: CountChannel) -> Self {
        Channel::Count(value)
    }
}

impl From<DigitalChannel> for Channel {
    fn from(value: DigitalChannel) -> Self {
        Channel::Digital(value)
    }
}

/// Channel definition as it appears in a configuration file.
///
/// ```toml
/// [[channels]]
/// type = "analog"
/// input = 0
/// range = 10.0
/// filter = "average"
///
/// [[channels]]
/// type = "thermocouple"
/// input = 1
/// thermocouple = "j"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Voltage input
    Analog {
        /// Input index 0-7
        input: u8,
        /// Span in ±volts
        range: f64,
        /// Filter mode
        #[serde(default)]
        filter: FilterMode,
        /// Filter decimation
        #[serde(default = "default_decimation")]
        decimation: u16,
    },
    /// Thermocouple input
    Thermocouple {
        /// Input index 0-7
        input: u8,
        /// Junction type letter
        thermocouple: String,
        /// Reporting unit
        #[serde(default)]
        unit: TemperatureUnit,
        /// Filter mode
        #[serde(default)]
        filter: FilterMode,
        /// Filter decimation
        #[serde(default = "default_decimation")]
        decimation: u16,
    },
    /// Pulse-rate input
    Rate {
        /// Full-scale range in Hz
        range_hz: u32,
        /// Moving-average length
        #[serde(default = "default_rate_filter")]
        filter_samples: u8,
    },
    /// Pulse counter
    Count,
    /// Digital port bit
    Digital {
        /// Bit 0-7
        bit: u8,
        /// Required direction
        #[serde(default)]
        direction: Option<Direction>,
    },
}

fn default_decimation() -> u16 {
    DEFAULT_DECIMATION
}

fn default_rate_filter() -> u8 {
    DEFAULT_RATE_FILTER
}

impl TryFrom<ChannelConfig> for Channel {
    type Error = DaqError;

    fn try_from(value: ChannelConfig) -> Result<Self, Self::Error> {
        match value {
            ChannelConfig::Analog {
                input,
                range,
                filter,
                decimation,
            } => Ok(AnalogChannel::new(input, range)?
                .with_filter(filter, decimation)?
                .into()),
            ChannelConfig::Thermocouple {
                input,
                thermocouple,
                unit,
                filter,
                decimation,
            } => Ok(ThermocoupleChannel::new(input, thermocouple.parse()?)?
                .with_unit(unit)
                .with_filter(filter, decimation)?
                .into()),
            ChannelConfig::Rate {
                range_hz,
                filter_samples,
            } => Ok(RateChannel::new(range_hz)?
                .with_filter_samples(filter_samples)?
                .into()),
            ChannelConfig::Count => Ok(CountChannel::new().into()),
            ChannelConfig::Digital { bit, direction } => {
                let direction = direction.ok_or_else(|| {
                    DaqError::InvalidConfiguration(format!(
                        "digital bit {bit} needs a direction (input or output)"
                    ))
                })?;
                Ok(DigitalChannel::new(bit, direction)?.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn analog_configuration_words() {
        let ch: Channel = AnalogChannel::new(0, 10.0).unwrap().into();
        assert_eq!(ch.configuration_word(), 0x0A00);

        let ch: Channel = AnalogChannel::new(3, 0.01).unwrap().into();
        assert_eq!(ch.configuration_word(), 0x0503);

        let ch: Channel = AnalogChannel::new(7, 50.0).unwrap().into();
        assert_eq!(ch.configuration_word(), 0x0807);
    }

    #[test]
    fn rejects_unsupported_analog_range() {
        assert!(matches!(
            AnalogChannel::new(0, 7.5),
            Err(DaqError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AnalogChannel::new(8, 10.0),
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn analog_scaling() {
        let ch: Channel = AnalogChannel::new(0, 10.0).unwrap().into();
        let (value, fault) = ch.decode(&16384i16.to_le_bytes());
        assert!(approx(value.as_f64().unwrap(), 5.0));
        assert!(fault.is_none());

        let (value, _) = ch.decode(&(-32768i16).to_le_bytes());
        assert!(approx(value.as_f64().unwrap(), -10.0));
    }

    #[test]
    fn thermocouple_configuration_and_conversion() {
        let tc = ThermocoupleChannel::new(1, "J".parse().unwrap()).unwrap();
        let ch: Channel = tc.into();
        assert_eq!(ch.configuration_word(), 0x1201);

        let (value, fault) = ch.decode(&0i16.to_le_bytes());
        assert_eq!(value, Value::Temperature(495.0, TemperatureUnit::Celsius));
        assert!(fault.is_none());

        let (value, _) = ch.decode(&1000i16.to_le_bytes());
        assert!(approx(value.as_f64().unwrap(), 1000.0 * 0.021515 + 495.0));
    }

    #[test]
    fn thermocouple_unit_conversion() {
        let ch: Channel = ThermocoupleChannel::new(0, ThermocoupleType::T)
            .unwrap()
            .with_unit(TemperatureUnit::Kelvin)
            .into();
        let (value, _) = ch.decode(&0i16.to_le_bytes());
        assert!(approx(value.as_f64().unwrap(), 373.15));
    }

    #[test]
    fn thermocouple_reserved_values_are_faults() {
        let ch: Channel = ThermocoupleChannel::new(2, ThermocoupleType::K).unwrap().into();

        let (value, fault) = ch.decode(&TC_OPEN_CIRCUIT.to_le_bytes());
        assert_eq!(value, Value::Invalid);
        assert_eq!(fault, Some(Fault::OpenCircuit));

        let (value, fault) = ch.decode(&TC_OUT_OF_RANGE.to_le_bytes());
        assert_eq!(value, Value::Invalid);
        assert_eq!(fault, Some(Fault::OutOfRange));
    }

    #[test]
    fn unrecognized_thermocouple_type() {
        assert!(matches!(
            "x".parse::<ThermocoupleType>(),
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rate_configuration_and_scaling() {
        let ch: Channel = RateChannel::new(5000).unwrap().into();
        assert_eq!(ch.configuration_word(), 0x0409);

        let (value, _) = ch.decode(&0x1000i16.to_le_bytes());
        assert!(approx(value.as_f64().unwrap(), 2812.5));

        assert!(RateChannel::new(4000).is_err());
        assert!(RateChannel::new(10).unwrap().with_filter_samples(0).is_err());
        assert!(RateChannel::new(10).unwrap().with_filter_samples(65).is_err());
    }

    #[test]
    fn count_is_unsigned() {
        let ch: Channel = CountChannel::new().into();
        assert_eq!(ch.configuration_word(), 0x000A);
        let (value, _) = ch.decode(&[0xFF, 0xFF]);
        assert_eq!(value, Value::Counts(65535));
    }

    #[test]
    fn digital_bit_extraction() {
        let ch: Channel = DigitalChannel::new(3, Direction::Input).unwrap().into();
        assert_eq!(ch.width(), DIGITAL_WIDTH);
        assert_eq!(ch.decode(&[0b0000_1000]).0, Value::Level(true));
        assert_eq!(ch.decode(&[0b1111_0111]).0, Value::Level(false));
        assert!(DigitalChannel::new(8, Direction::Output).is_err());
    }

    #[test]
    fn short_window_is_invalid() {
        let ch: Channel = AnalogChannel::new(0, 1.0).unwrap().into();
        assert_eq!(ch.decode(&[0x01]).0, Value::Invalid);
    }

    #[test]
    fn filter_decimation_bounds() {
        assert!(Filter::new(FilterMode::Average, 0).is_err());
        assert!(Filter::new(FilterMode::Average, 32768).is_err());
        assert!(Filter::new(FilterMode::Maximum, 32767).is_ok());
    }

    #[test]
    fn setup_commands_follow_channel_kind() {
        let ch: Channel = AnalogChannel::new(4, 1.0)
            .unwrap()
            .with_filter(FilterMode::Average, 20)
            .unwrap()
            .into();
        assert_eq!(
            ch.setup_commands(),
            vec![Command::Filter {
                input: 4,
                mode: FilterMode::Average
            }]
        );

        let ch: Channel = RateChannel::new(100).unwrap().with_filter_samples(8).unwrap().into();
        assert_eq!(ch.setup_commands(), vec![Command::RateFilter(8)]);
    }

    #[test]
    fn digital_config_requires_direction() {
        let result = Channel::try_from(ChannelConfig::Digital {
            bit: 1,
            direction: None,
        });
        assert!(matches!(result, Err(DaqError::InvalidConfiguration(_))));

        let ch = Channel::try_from(ChannelConfig::Digital {
            bit: 1,
            direction: Some(Direction::Output),
        })
        .unwrap();
        assert_eq!(ch.id(), ChannelId::Digital(1));
    }

    #[test]
    fn thermocouple_config_parses_type_letter() {
        let ch = Channel::try_from(ChannelConfig::Thermocouple {
            input: 5,
            thermocouple: "k".into(),
            unit: TemperatureUnit::Fahrenheit,
            filter: FilterMode::LastPoint,
            decimation: 1,
        })
        .unwrap();
        assert_eq!(ch.id(), ChannelId::Analog(5));
        assert_eq!(ch.configuration_word(), 0x1305);

        let bad = Channel::try_from(ChannelConfig::Thermocouple {
            input: 5,
            thermocouple: "q".into(),
            unit: TemperatureUnit::Celsius,
            filter: FilterMode::LastPoint,
            decimation: 1,
        });
        assert!(bad.is_err());
    }
}
