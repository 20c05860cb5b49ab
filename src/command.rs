//! Command channel
//!
//! Request/response exchange with the DI-2008 over the injected [`Transport`]. The channel
//! owns the transport behind an async mutex which it shares with the acquisition loop, so
//! configuration traffic and stream reads never interleave on the serial link.
//!
//! Exchange rules:
//! - A configuration command is written as `verb args\r`; the device echoes it, optionally
//!   preceded by NUL padding. The echo is read byte by byte up to the terminator.
//! - No echo within the command timeout is a `DeviceTimeout`, a wrong one is `Protocol`.
//! - Configuration commands are refused with `AcquisitionActive` while the device streams,
//!   before anything is written. `dout` and `led` are still allowed; they are written
//!   without waiting for an echo, which would be buried in the binary stream.
//! - `stop` is followed by draining the line until it stays quiet.

use crate::acquisition::{AcquisitionState, SharedState};
use crate::adapters::Transport;
use crate::channel::{Direction, DIGITAL_BITS};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use crate::protocol::{
    Acknowledgement, Command, InfoItem, LedColor, SAMPLE_RATE_RANGE, TERMINATOR,
};
use crate::scan_list::ScanList;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Transport shared between the command channel and the acquisition loop.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

const DRAIN_CHUNK: usize = 256;

/// Time limits for command exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Maximum wait for a command echo
    pub command: Duration,
    /// Silence that ends a drain after `stop`
    pub quiet: Duration,
    /// Maximum duration of a drain
    pub drain: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_millis(1000),
            quiet: Duration::from_millis(100),
            drain: Duration::from_millis(2000),
        }
    }
}

impl From<&DeviceConfig> for CommandTimeouts {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            command: Duration::from_millis(config.command_timeout_ms),
            quiet: Duration::from_millis(config.quiet_ms),
            drain: Duration::from_millis(config.drain_timeout_ms),
        }
    }
}

/// Command/acknowledge exchange with the device.
pub struct CommandChannel {
    transport: SharedTransport,
    state: SharedState,
    timeouts: CommandTimeouts,
    scan_list: Option<Arc<ScanList>>,
    output_mask: u8,
    output_levels: u8,
}

impl CommandChannel {
    /// Take ownership of `transport`.
    pub fn new(transport: impl Transport + 'static, timeouts: CommandTimeouts) -> Self {
        Self {
            transport: Arc::new(Mutex::new(Box::new(transport))),
            state: SharedState::default(),
            timeouts,
            scan_list: None,
            output_mask: 0,
            output_levels: 0,
        }
    }

    /// Transport handle for the acquisition loop.
    pub fn transport(&self) -> SharedTransport {
        Arc::clone(&self.transport)
    }

    /// Acquisition state shared with the acquisition loop.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Active time limits.
    pub fn timeouts(&self) -> CommandTimeouts {
        self.timeouts
    }

    /// The scan list last transmitted with [`CommandChannel::configure`].
    pub fn scan_list(&self) -> Option<Arc<ScanList>> {
        self.scan_list.clone()
    }

    /// Digital bits currently configured as outputs.
    pub fn output_mask(&self) -> u8 {
        self.output_mask
    }

    /// Write one command and wait for its acknowledgement.
    ///
    /// Returns the validated payload: the echo, the answer to `info`, or an empty string for
    /// commands that are not answered in text.
    ///
    /// # Errors
    /// - `AcquisitionActive` for configuration commands while acquiring
    /// - `Transport` if the write or a read fails
    /// - `DeviceTimeout` if the acknowledgement does not arrive in time
    /// - `Protocol` if the acknowledgement does not match
    pub async fn send_command(&self, command: Command) -> AppResult<String> {
        let acquiring = self.state.get() != AcquisitionState::Idle;
        if acquiring && command.is_configuration() {
            return Err(DaqError::AcquisitionActive);
        }

        let mut transport = self.transport.lock().await;
        debug!(command = %command, "sending");
        transport.write(&command.to_bytes()).await?;

        match command.acknowledgement() {
            Acknowledgement::Echo if acquiring => Ok(String::new()),
            Acknowledgement::Echo => {
                let line = read_line(&mut **transport, &command, self.timeouts.command).await?;
                trace!(command = %command, response = %line.escape_default(), "received");
                command.validate_response(&line)
            }
            Acknowledgement::Stream => Ok(String::new()),
            Acknowledgement::Drain => {
                let drained = drain(&mut **transport, self.timeouts).await?;
                debug!(bytes = drained, "drained stream after stop");
                Ok(String::new())
            }
        }
    }

    /// Transmit the configuration for `scan_list` and make it the active scan list.
    ///
    /// The previous scan list stays active when the request is refused up front
    /// (`AcquisitionActive`, `EmptyScanList`). Once commands have been written, a failure
    /// leaves no active scan list because the device holds a partial configuration.
    pub async fn configure(&mut self, scan_list: ScanList) -> AppResult<Arc<ScanList>> {
        self.ensure_idle()?;
        let encoding = scan_list.encode()?;

        self.scan_list = None;
        for command in &encoding.commands {
            self.send_command(*command).await?;
            if let Command::DigitalDirection(mask) = command {
                self.output_mask = *mask;
            }
        }

        info!(
            channels = scan_list.len(),
            slots = scan_list.slots().len(),
            cycle_width = encoding.cycle_width,
            "scan list configured"
        );
        let scan_list = Arc::new(scan_list);
        self.scan_list = Some(Arc::clone(&scan_list));
        Ok(scan_list)
    }

    /// Issue `start` for the active scan list and mark acquisition as running.
    ///
    /// # Errors
    /// - `NoScanList` if nothing was configured; nothing is written
    /// - `AcquisitionActive` if already acquiring
    pub async fn start_acquisition(&self) -> AppResult<Arc<ScanList>> {
        let scan_list = self.scan_list.clone().ok_or(DaqError::NoScanList)?;
        self.send_command(Command::Start).await?;
        self.state.set(AcquisitionState::Running);
        info!("acquisition started");
        Ok(scan_list)
    }

    /// Issue `stop`, drain the stream and mark acquisition as idle.
    ///
    /// Safe to call in any state. The state is idle afterwards even if draining failed.
    pub async fn stop_acquisition(&self) -> AppResult<()> {
        let result = self.send_command(Command::Stop).await.map(|_| ());
        self.state.set(AcquisitionState::Idle);
        if let Err(e) = &result {
            warn!(error = %e, "stop was not acknowledged cleanly");
        }
        result
    }

    /// Drive digital output `bit` high (`true`) or low.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `bit` is not a digital bit
    /// - `DirectionMismatch` unless the bit was configured as an output
    pub async fn write_digital_output(&mut self, bit: u8, level: bool) -> AppResult<()> {
        check_bit(bit)?;
        if self.output_mask & (1 << bit) == 0 {
            return Err(DaqError::DirectionMismatch { bit });
        }

        let levels = if level {
            self.output_levels | (1 << bit)
        } else {
            self.output_levels & !(1 << bit)
        };
        self.send_command(Command::DigitalOutput(levels)).await?;
        self.output_levels = levels;
        debug!(bit, level, "digital output written");
        Ok(())
    }

    /// Configure the direction of digital `bit`.
    pub async fn set_direction(&mut self, bit: u8, direction: Direction) -> AppResult<()> {
        check_bit(bit)?;
        let mask = match direction {
            Direction::Output => self.output_mask | (1 << bit),
            Direction::Input => self.output_mask & !(1 << bit),
        };
        self.send_command(Command::DigitalDirection(mask)).await?;
        self.output_mask = mask;
        Ok(())
    }

    /// Set the front-panel LED color.
    pub async fn set_indicator(&self, color: LedColor) -> AppResult<()> {
        self.send_command(Command::Led(color)).await.map(|_| ())
    }

    /// Set the sample rate divisor.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `divisor` is outside 4..=2232.
    pub async fn set_sample_rate(&self, divisor: u16) -> AppResult<()> {
        if !SAMPLE_RATE_RANGE.contains(&divisor) {
            return Err(DaqError::InvalidConfiguration(format!(
                "sample rate divisor {divisor} is outside {}..={}",
                SAMPLE_RATE_RANGE.start(),
                SAMPLE_RATE_RANGE.end()
            )));
        }
        self.send_command(Command::SampleRate(divisor)).await.map(|_| ())
    }

    /// Read a device information item.
    pub async fn query_info(&self, item: InfoItem) -> AppResult<String> {
        self.send_command(Command::Info(item)).await
    }

    /// Close the transport.
    pub async fn close(&self) -> AppResult<()> {
        self.transport.lock().await.close().await
    }

    fn ensure_idle(&self) -> AppResult<()> {
        if self.state.get() == AcquisitionState::Idle {
            Ok(())
        } else {
            Err(DaqError::AcquisitionActive)
        }
    }
}

fn check_bit(bit: u8) -> AppResult<()> {
    if bit >= DIGITAL_BITS {
        return Err(DaqError::InvalidConfiguration(format!(
            "digital bit {bit} is out of range 0-{}",
            DIGITAL_BITS - 1
        )));
    }
    Ok(())
}

/// Read one response line, skipping NUL padding.
async fn read_line(
    transport: &mut dyn Transport,
    command: &Command,
    timeout: Duration,
) -> AppResult<String> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(DaqError::DeviceTimeout {
                command: command.to_string(),
                timeout,
            });
        }

        match transport.read(1, remaining).await?.first() {
            Some(&TERMINATOR) => return Ok(String::from_utf8_lossy(&line).into_owned()),
            Some(0) | None => {}
            Some(&byte) => line.push(byte),
        }
    }
}

/// Discard incoming bytes until the line is quiet for `timeouts.quiet`.
async fn drain(transport: &mut dyn Transport, timeouts: CommandTimeouts) -> AppResult<usize> {
    let deadline = Instant::now() + timeouts.drain;
    let mut drained = 0;

    loop {
        let bytes = transport.read(DRAIN_CHUNK, timeouts.quiet).await?;
        if bytes.is_empty() {
            return Ok(drained);
        }
        drained += bytes.len();
        if Instant::now() >= deadline {
            return Err(DaqError::DeviceTimeout {
                command: Command::Stop.to_string(),
                timeout: timeouts.drain,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, MockDevice};
    use crate::channel::{AnalogChannel, DigitalChannel};
    use tracing_test::traced_test;

    fn channel() -> (CommandChannel, MockDevice) {
        let adapter = MockAdapter::new();
        let device = adapter.device();
        let timeouts = CommandTimeouts {
            command: Duration::from_millis(50),
            quiet: Duration::from_millis(10),
            drain: Duration::from_millis(200),
        };
        (CommandChannel::new(adapter, timeouts), device)
    }

    fn scan_list() -> ScanList {
        ScanList::from_channels([AnalogChannel::new(0, 10.0).unwrap()]).unwrap()
    }

    #[tokio::test]
    async fn test_send_command_validates_echo() {
        let (channel, device) = channel();
        let echo = channel.send_command(Command::Decimation(10)).await.unwrap();
        assert_eq!(echo, "dec 10");
        assert_eq!(device.call_log(), vec!["dec 10"]);
    }

    #[tokio::test]
    async fn test_missing_echo_times_out() {
        let (channel, device) = channel();
        device.mute(true);
        let err = channel.send_command(Command::Decimation(10)).await.unwrap_err();
        assert!(matches!(err, DaqError::DeviceTimeout { ref command, .. } if command == "dec 10"));
    }

    #[tokio::test]
    async fn test_wrong_echo_is_protocol_error() {
        let (channel, device) = channel();
        device.corrupt_next_echo();
        let err = channel.send_command(Command::RateFilter(8)).await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_query_info() {
        let (channel, _device) = channel();
        assert_eq!(channel.query_info(InfoItem::ProductId).await.unwrap(), "2008");
    }

    #[tokio::test]
    async fn test_start_without_scan_list_writes_nothing() {
        let (channel, device) = channel();
        assert!(matches!(
            channel.start_acquisition().await,
            Err(DaqError::NoScanList)
        ));
        assert!(device.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_refused_while_running() {
        let (mut channel, device) = channel();
        channel.configure(scan_list()).await.unwrap();
        channel.start_acquisition().await.unwrap();
        device.clear_call_log();

        assert!(matches!(
            channel.send_command(Command::Decimation(4)).await,
            Err(DaqError::AcquisitionActive)
        ));
        assert!(matches!(
            channel.set_sample_rate(100).await,
            Err(DaqError::AcquisitionActive)
        ));
        assert!(device.call_log().is_empty());

        // LED writes are not configuration and go out without an echo.
        channel.set_indicator(LedColor::Red).await.unwrap();
        assert_eq!(device.call_log(), vec!["led 4"]);
    }

    #[tokio::test]
    async fn test_stop_drains_stream() {
        let (mut channel, device) = channel();
        channel.configure(scan_list()).await.unwrap();
        channel.start_acquisition().await.unwrap();
        device.push_stream(&[0u8; 64]);

        channel.stop_acquisition().await.unwrap();
        assert_eq!(channel.state().get(), AcquisitionState::Idle);
        assert!(!device.is_streaming());

        // The line is clean: the next exchange sees its own echo.
        let echo = channel.send_command(Command::Decimation(1)).await.unwrap();
        assert_eq!(echo, "dec 1");
    }

    #[tokio::test]
    async fn test_digital_output_requires_output_direction() {
        let (mut channel, device) = channel();
        assert!(matches!(
            channel.write_digital_output(2, true).await,
            Err(DaqError::DirectionMismatch { bit: 2 })
        ));
        assert!(device.call_log().is_empty());

        channel.set_direction(2, Direction::Output).await.unwrap();
        channel.write_digital_output(2, true).await.unwrap();
        channel.write_digital_output(2, false).await.unwrap();
        assert_eq!(device.call_log(), vec!["endo 4", "dout 4", "dout 0"]);

        assert!(matches!(
            channel.write_digital_output(9, true).await,
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_list_output_bits_enable_writes() {
        let (mut channel, _device) = channel();
        let list = ScanList::from_channels([DigitalChannel::new(1, Direction::Output).unwrap()])
            .unwrap();
        channel.configure(list).await.unwrap();
        assert_eq!(channel.output_mask(), 0b10);
        channel.write_digital_output(1, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_configure_clears_active_list() {
        let (mut channel, device) = channel();
        channel.configure(scan_list()).await.unwrap();
        device.fail_next_write();
        assert!(channel.configure(scan_list()).await.is_err());
        assert!(channel.scan_list().is_none());
    }

    #[tokio::test]
    async fn test_rejects_bad_sample_rate() {
        let (channel, device) = channel();
        assert!(channel.set_sample_rate(3).await.is_err());
        assert!(channel.set_sample_rate(2233).await.is_err());
        channel.set_sample_rate(4).await.unwrap();
        assert_eq!(device.call_log(), vec!["srate 4"]);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_logs_command_traffic() {
        let (channel, _device) = channel();
        channel.send_command(Command::Decimation(10)).await.unwrap();
        assert!(logs_contain("sending"));
        assert!(logs_contain("dec 10"));
    }
}
