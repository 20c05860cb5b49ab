//! Acquisition loop
//!
//! Background task that pulls sample bytes from the transport, feeds the
//! [`SampleDecoder`] and publishes every complete cycle to the [`ValueStore`].
//!
//! State machine, shared with the command channel through [`SharedState`]:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --drained--> Idle
//!                    |
//!                    +--transport error / desync--> Idle (error reported)
//! ```
//!
//! The loop holds the transport lock only for one bounded read at a time, so `dout` and
//! `led` writes from the caller slip in between reads.

use crate::command::SharedTransport;
use crate::config::DeviceConfig;
use crate::decoder::SampleDecoder;
use crate::error::{AppResult, DaqError};
use crate::scan_list::ScanList;
use crate::store::ValueStore;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Acquisition state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Not streaming; configuration allowed
    Idle,
    /// Streaming; the loop is decoding
    Running,
    /// Stop requested; the loop is exiting
    Stopping,
}

impl AcquisitionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AcquisitionState::Running,
            2 => AcquisitionState::Stopping,
            _ => AcquisitionState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AcquisitionState::Idle => 0,
            AcquisitionState::Running => 1,
            AcquisitionState::Stopping => 2,
        }
    }
}

/// Atomic [`AcquisitionState`] cell shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    /// Current state.
    pub fn get(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the state unconditionally.
    pub fn set(&self, state: AcquisitionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns false if the state was not `from`.
    pub fn transition(&self, from: AcquisitionState, to: AcquisitionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Read parameters of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSettings {
    /// Bounded wait of each transport read
    pub read_timeout: Duration,
    /// Maximum bytes per read
    pub read_chunk: usize,
    /// Silence after which a partial cycle counts as desynchronised
    pub stall_timeout: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(50),
            read_chunk: 1024,
            stall_timeout: Duration::from_millis(500),
        }
    }
}

impl From<&DeviceConfig> for AcquisitionSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            read_chunk: config.read_chunk,
            stall_timeout: Duration::from_millis(config.stall_timeout_ms),
        }
    }
}

/// Handle to the background read-decode-publish task.
pub struct AcquisitionLoop {
    state: SharedState,
    settings: AcquisitionSettings,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    /// Create an idle loop bound to `state`.
    pub fn new(state: SharedState, settings: AcquisitionSettings) -> Self {
        Self {
            state,
            settings,
            handle: None,
        }
    }

    /// Spawn the loop for `scan_list`. The state must already be `Running`.
    ///
    /// Activates one store entry per channel before the first read.
    pub fn spawn(
        &mut self,
        transport: SharedTransport,
        scan_list: &ScanList,
        store: Arc<ValueStore>,
        errors: mpsc::Sender<DaqError>,
    ) -> AppResult<()> {
        if self.handle.is_some() {
            return Err(DaqError::AcquisitionActive);
        }

        let decoder = SampleDecoder::new(scan_list)?;
        store.activate(scan_list.ids());

        let worker = Worker {
            transport,
            state: self.state.clone(),
            settings: self.settings,
            decoder,
            store,
            errors,
        };
        self.handle = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Whether a task was spawned and has not been joined yet.
    pub fn is_spawned(&self) -> bool {
        self.handle.is_some()
    }

    /// Ask the loop to exit and wait until it has.
    ///
    /// Safe to call when nothing is running. Leaves the state at `Stopping` if the loop
    /// was running; the command channel returns it to `Idle` after `stop`.
    pub async fn halt(&mut self) {
        self.state
            .transition(AcquisitionState::Running, AcquisitionState::Stopping);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "acquisition task ended abnormally");
            }
        }
    }
}

struct Worker {
    transport: SharedTransport,
    state: SharedState,
    settings: AcquisitionSettings,
    decoder: SampleDecoder,
    store: Arc<ValueStore>,
    errors: mpsc::Sender<DaqError>,
}

impl Worker {
    async fn run(mut self) {
        info!(
            cycle_width = self.decoder.cycle_width(),
            "acquisition loop running"
        );

        while self.state.get() == AcquisitionState::Running {
            if let Err(e) = self.step().await {
                self.fail(e);
                break;
            }
        }

        debug!(
            cycles = self.decoder.cycles_decoded(),
            "acquisition loop exited"
        );
    }

    async fn step(&mut self) -> AppResult<()> {
        let bytes = {
            let mut transport = self.transport.lock().await;
            transport
                .read(self.settings.read_chunk, self.settings.read_timeout)
                .await?
        };

        if bytes.is_empty() {
            return self
                .decoder
                .check_stall(Instant::now(), self.settings.stall_timeout);
        }

        for cycle in self.decoder.feed(&bytes) {
            for sample in cycle.samples.iter().filter(|s| s.fault.is_some()) {
                debug!(channel = %sample.channel, fault = ?sample.fault, "channel fault");
            }
            self.store.publish(&cycle);
        }
        Ok(())
    }

    fn fail(&self, error: DaqError) {
        warn!(error = %error, "acquisition stopped");
        self.state
            .transition(AcquisitionState::Running, AcquisitionState::Idle);
        if let Err(e) = self.errors.try_send(error) {
            warn!(error = %e, "acquisition error dropped");
        }
    }
}
