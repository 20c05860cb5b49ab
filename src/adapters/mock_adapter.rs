//! Mock DI-2008 for testing
//!
//! [`MockAdapter`] implements [`Transport`] without hardware. It behaves like the device
//! as seen from the serial port:
//! - Configuration commands are echoed, `info N` is answered from a table
//! - `start` switches to streaming; queued sample bytes are delivered only while streaming
//! - `stop` ends the stream and echoes
//! - No text replies while streaming
//!
//! A [`MockDevice`] handle, obtained from [`MockAdapter::device`], stays with the test after
//! the adapter is moved into an instrument. It exposes the call log and failure injection.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DeviceState {
    call_log: Vec<String>,
    partial_line: Vec<u8>,
    replies: VecDeque<u8>,
    stream: VecDeque<u8>,
    streaming: bool,
    info: HashMap<u8, String>,
    fail_next_write: bool,
    fail_reads: bool,
    muted: bool,
    corrupt_next_echo: bool,
    closed: bool,
}

impl DeviceState {
    fn handle_line(&mut self, line: String) {
        let reply = if line == "start" {
            self.streaming = true;
            None
        } else if line == "stop" {
            self.streaming = false;
            self.stream.clear();
            Some(line.clone())
        } else if self.streaming {
            None
        } else if let Some(code) = line.strip_prefix("info ") {
            let answer = code
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|code| self.info.get(&code))
                .cloned()
                .unwrap_or_default();
            Some(format!("{line} {answer}"))
        } else {
            Some(line.clone())
        };

        self.call_log.push(line);

        if let Some(mut reply) = reply {
            if self.muted {
                return;
            }
            if std::mem::take(&mut self.corrupt_next_echo) {
                reply = format!("?{reply}");
            }
            self.replies.extend(reply.into_bytes());
            self.replies.push_back(b'\r');
        }
    }

    fn take_readable(&mut self, max_bytes: usize) -> Vec<u8> {
        let from_replies = max_bytes.min(self.replies.len());
        let mut bytes: Vec<u8> = self.replies.drain(..from_replies).collect();

        if self.streaming {
            let from_stream = (max_bytes - bytes.len()).min(self.stream.len());
            bytes.extend(self.stream.drain(..from_stream));
        }
        bytes
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted in-memory DI-2008.
///
/// # Example
///
/// ```
/// use di2008_daq::adapters::{MockAdapter, Transport};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let mut adapter = MockAdapter::new();
/// adapter.write(b"info 0\r").await.unwrap();
/// let reply = adapter.read(64, Duration::from_millis(10)).await.unwrap();
/// assert_eq!(reply, b"info 0 DATAQ\r".to_vec());
/// # })
/// ```
pub struct MockAdapter {
    state: Arc<Mutex<DeviceState>>,
    readable: Arc<Notify>,
}

impl MockAdapter {
    /// Create a mock device reporting itself as a DATAQ 2008.
    pub fn new() -> Self {
        let info = HashMap::from([
            (0, "DATAQ".to_string()),
            (1, "2008".to_string()),
            (2, "1.05".to_string()),
            (6, "5A0C2F11".to_string()),
        ]);
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                info,
                ..DeviceState::default()
            })),
            readable: Arc::new(Notify::new()),
        }
    }

    /// Handle for inspecting and scripting this device.
    pub fn device(&self) -> MockDevice {
        MockDevice {
            state: Arc::clone(&self.state),
            readable: Arc::clone(&self.readable),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockAdapter {
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(DaqError::Transport("mock device is closed".into()));
            }
            if std::mem::take(&mut state.fail_next_write) {
                return Err(DaqError::Transport("mock write failure".into()));
            }

            state.partial_line.extend_from_slice(bytes);
            while let Some(end) = state.partial_line.iter().position(|b| *b == b'\r') {
                let line: Vec<u8> = state.partial_line.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line[..end]).into_owned();
                state.handle_line(line);
            }
        }
        self.readable.notify_one();
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = lock(&self.state);
                if state.closed {
                    return Err(DaqError::Transport("mock device is closed".into()));
                }
                if state.fail_reads {
                    return Err(DaqError::Transport("mock read failure".into()));
                }
                let bytes = state.take_readable(max_bytes);
                if !bytes.is_empty() {
                    return Ok(bytes);
                }
            }

            if tokio::time::timeout_at(deadline, self.readable.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        lock(&self.state).closed = true;
        self.readable.notify_one();
        Ok(())
    }

    fn info(&self) -> String {
        "MockAdapter(DI-2008)".to_string()
    }
}

/// Test-side handle to a [`MockAdapter`].
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    readable: Arc<Notify>,
}

impl MockDevice {
    /// Command lines received so far, without terminators.
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.state).call_log.clone()
    }

    /// Forget the recorded commands.
    pub fn clear_call_log(&self) {
        lock(&self.state).call_log.clear();
    }

    /// Queue sample bytes; they are delivered once the device is streaming.
    pub fn push_stream(&self, bytes: &[u8]) {
        lock(&self.state).stream.extend(bytes.iter().copied());
        self.readable.notify_one();
    }

    /// Whether `start` has been received and not yet followed by `stop`.
    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    /// Sample bytes queued but not yet read.
    pub fn queued_stream_bytes(&self) -> usize {
        lock(&self.state).stream.len()
    }

    /// Answer `info {code}` with `value`.
    pub fn set_info(&self, code: u8, value: &str) {
        lock(&self.state).info.insert(code, value.to_string());
    }

    /// Fail the next write with a transport error.
    pub fn fail_next_write(&self) {
        lock(&self.state).fail_next_write = true;
    }

    /// Fail every read with a transport error while set.
    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
        self.readable.notify_one();
    }

    /// Swallow all text replies while set.
    pub fn mute(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    /// Garble the next echo.
    pub fn corrupt_next_echo(&self) {
        lock(&self.state).corrupt_next_echo = true;
    }

    /// Whether the adapter was closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_echoes_configuration_commands() {
        let mut adapter = MockAdapter::new();
        adapter.write(b"slist 0 2560\r").await.unwrap();

        let reply = adapter.read(64, WAIT).await.unwrap();
        assert_eq!(reply, b"slist 0 2560\r".to_vec());
        assert_eq!(adapter.device().call_log(), vec!["slist 0 2560"]);
    }

    #[tokio::test]
    async fn test_split_writes_form_one_line() {
        let mut adapter = MockAdapter::new();
        adapter.write(b"dec ").await.unwrap();
        adapter.write(b"10\r").await.unwrap();
        assert_eq!(adapter.device().call_log(), vec!["dec 10"]);
    }

    #[tokio::test]
    async fn test_stream_only_while_started() {
        let mut adapter = MockAdapter::new();
        let device = adapter.device();
        device.push_stream(&[1, 2, 3, 4]);

        assert!(adapter.read(64, WAIT).await.unwrap().is_empty());

        adapter.write(b"start\r").await.unwrap();
        assert!(device.is_streaming());
        assert_eq!(adapter.read(3, WAIT).await.unwrap(), vec![1, 2, 3]);

        adapter.write(b"stop\r").await.unwrap();
        assert!(!device.is_streaming());
        assert_eq!(device.queued_stream_bytes(), 0);
        assert_eq!(adapter.read(64, WAIT).await.unwrap(), b"stop\r".to_vec());
    }

    #[tokio::test]
    async fn test_no_echo_while_streaming() {
        let mut adapter = MockAdapter::new();
        adapter.write(b"start\r").await.unwrap();
        adapter.write(b"led 2\r").await.unwrap();
        assert!(adapter.read(64, WAIT).await.unwrap().is_empty());
        assert_eq!(adapter.device().call_log(), vec!["start", "led 2"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mut adapter = MockAdapter::new();
        let device = adapter.device();

        device.fail_next_write();
        assert!(matches!(
            adapter.write(b"stop\r").await,
            Err(DaqError::Transport(_))
        ));
        // Only the next write fails.
        adapter.write(b"stop\r").await.unwrap();

        device.fail_reads(true);
        assert!(adapter.read(1, WAIT).await.is_err());
        device.fail_reads(false);

        device.corrupt_next_echo();
        adapter.write(b"ps 0\r").await.unwrap();
        let reply = adapter.read(64, WAIT).await.unwrap();
        assert!(reply.ends_with(b"?ps 0\r"));
    }

    #[tokio::test]
    async fn test_wakes_pending_reader() {
        let mut adapter = MockAdapter::new();
        let device = adapter.device();
        adapter.write(b"start\r").await.unwrap();

        let reader = tokio::spawn(async move { adapter.read(8, Duration::from_secs(1)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        device.push_stream(&[0xAA, 0xBB]);

        assert_eq!(reader.await.unwrap().unwrap(), vec![0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_close() {
        let mut adapter = MockAdapter::new();
        let device = adapter.device();
        adapter.close().await.unwrap();
        assert!(device.is_closed());
        assert!(adapter.write(b"stop\r").await.is_err());
    }
}
