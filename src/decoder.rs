//! Sample decoder
//!
//! Stateful parser for the unframed binary stream the device sends while acquiring. The
//! stream carries no delimiters: cycle boundaries are computed from the scan list's slot
//! widths, so the decoder depends on never losing a byte.
//!
//! [`SampleDecoder::feed`] buffers whatever arrived and returns a lazy iterator over the
//! complete cycles now available. A partial cycle stays buffered until the next call.
//!
//! There is no resynchronisation marker in the stream. The device sends whole `ps`
//! packets, so a packet regularly ends inside a cycle and the rest arrives with the next
//! packet, however slow the sample rate. A partial cycle is only suspicious when the
//! stream has stopped between packet boundaries: [`SampleDecoder::check_stall`] then
//! reports `DesyncSuspected`; recovering is left to the caller.

use crate::channel::{Channel, ChannelId, Fault, Value};
use crate::error::{AppResult, DaqError};
use crate::scan_list::{ScanList, Slot, SlotLayout};
use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;

/// One decoded channel within a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    /// Channel identity
    pub channel: ChannelId,
    /// Engineering value
    pub value: Value,
    /// Fault flag
    pub fault: Option<Fault>,
}

/// All channels of one scan cycle, in scan order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Zero-based cycle number since the decoder was created or reset
    pub sequence: u64,
    /// Decoded channels in scan order
    pub samples: Vec<Decoded>,
}

impl Cycle {
    /// Sample of channel `id`, if it is part of the cycle.
    pub fn get(&self, id: ChannelId) -> Option<&Decoded> {
        self.samples.iter().find(|sample| sample.channel == id)
    }

    /// Channel identities in scan order.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.samples.iter().map(|sample| sample.channel).collect()
    }
}

/// Byte-stream parser bound to one scan list.
#[derive(Debug)]
pub struct SampleDecoder {
    layout: Vec<SlotLayout>,
    cycle_width: usize,
    packet_bytes: usize,
    buffer: BytesMut,
    received: u64,
    sequence: u64,
    last_input: Option<Instant>,
}

impl SampleDecoder {
    /// Create a decoder for `scan_list`.
    ///
    /// # Errors
    /// `EmptyScanList` if the scan list has no channels.
    pub fn new(scan_list: &ScanList) -> AppResult<Self> {
        scan_list.validate()?;
        let cycle_width = scan_list.cycle_width();
        Ok(Self {
            layout: scan_list.layout(),
            cycle_width,
            packet_bytes: scan_list.packet_size().bytes(),
            buffer: BytesMut::with_capacity(cycle_width * 64),
            received: 0,
            sequence: 0,
            last_input: None,
        })
    }

    /// Append `bytes` and iterate over the complete cycles now buffered.
    ///
    /// Cycles not consumed before the iterator is dropped are returned by the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Cycles<'_> {
        if !bytes.is_empty() {
            self.buffer.extend_from_slice(bytes);
            self.received += bytes.len() as u64;
            self.last_input = Some(Instant::now());
        }
        Cycles { decoder: self }
    }

    /// Bytes per scan cycle.
    pub fn cycle_width(&self) -> usize {
        self.cycle_width
    }

    /// Buffered bytes not yet part of a complete cycle.
    pub fn pending(&self) -> usize {
        self.buffer.len() % self.cycle_width
    }

    /// Number of cycles decoded so far.
    pub fn cycles_decoded(&self) -> u64 {
        self.sequence
    }

    /// Whether the bytes received so far end on a device packet boundary.
    pub fn at_packet_boundary(&self) -> bool {
        self.received % self.packet_bytes as u64 == 0
    }

    /// Report `DesyncSuspected` if a partial cycle has waited `stall_timeout` or longer
    /// for its remaining bytes while the stream stopped inside a packet.
    ///
    /// A partial cycle left at a packet boundary is waiting for the next packet and is
    /// never reported, whatever the gap.
    pub fn check_stall(&self, now: Instant, stall_timeout: Duration) -> AppResult<()> {
        let buffered = self.pending();
        if buffered == 0 || self.at_packet_boundary() {
            return Ok(());
        }
        match self.last_input {
            Some(last) if now.saturating_duration_since(last) >= stall_timeout => {
                Err(DaqError::DesyncSuspected {
                    buffered,
                    cycle_width: self.cycle_width,
                })
            }
            _ => Ok(()),
        }
    }

    /// Drop buffered bytes and restart the cycle count.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.received = 0;
        self.sequence = 0;
        self.last_input = None;
    }

    fn next_cycle(&mut self) -> Option<Cycle> {
        if self.buffer.len() < self.cycle_width {
            return None;
        }

        let raw = self.buffer.split_to(self.cycle_width);
        let mut samples = Vec::with_capacity(self.layout.len());
        for entry in &self.layout {
            let window = &raw[entry.window.clone()];
            match &entry.slot {
                Slot::Channel(channel) => samples.push(decode(channel, window)),
                Slot::Digital(bits) => samples.extend(
                    bits.iter()
                        .map(|bit| decode(&Channel::Digital(*bit), window)),
                ),
            }
        }

        let cycle = Cycle {
            sequence: self.sequence,
            samples,
        };
        self.sequence += 1;
        Some(cycle)
    }
}

fn decode(channel: &Channel, window: &[u8]) -> Decoded {
    let (value, fault) = channel.decode(window);
    Decoded {
        channel: channel.id(),
        value,
        fault,
    }
}

/// Lazy iterator over complete cycles, returned by [`SampleDecoder::feed`].
#[derive(Debug)]
pub struct Cycles<'a> {
    decoder: &'a mut SampleDecoder,
}

impl Iterator for Cycles<'_> {
    type Item = Cycle;

    fn next(&mut self) -> Option<Cycle> {
        self.decoder.next_cycle()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let ready = self.decoder.buffer.len() / self.decoder.cycle_width;
        (ready, Some(ready))
    }
}
