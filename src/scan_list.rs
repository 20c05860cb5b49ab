//! Scan List
//!
//! An ordered, validated collection of channels. Insertion order is the hardware scan
//! order. Every digital channel shares one combined slot, placed where the first digital
//! channel was added; all other channels take a slot of their own.
//!
//! The scan list never talks to the transport. [`ScanList::encode`] produces the
//! commands the [`CommandChannel`](crate::command::CommandChannel) transmits and the
//! scan-cycle width the [`SampleDecoder`](crate::decoder::SampleDecoder) parses against.

use crate::channel::{Channel, ChannelId, DigitalChannel, Direction, DIGITAL_WIDTH};
use crate::error::{AppResult, DaqError};
use crate::protocol::{Command, PacketSize};
use std::ops::Range;
use tracing::debug;

/// Hardware limit on scan-list entries (the combined digital slot counts as one).
pub const MAX_SLOTS: usize = 11;

/// One entry of the hardware scan list.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A word-sized channel
    Channel(Channel),
    /// The digital byte, shared by every digital channel in scan order
    Digital(DigitalBits),
}

/// Digital channels sharing the digital slot, in scan order. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalBits {
    first: DigitalChannel,
    rest: Vec<DigitalChannel>,
}

impl DigitalBits {
    fn new(first: DigitalChannel) -> Self {
        Self {
            first,
            rest: Vec::new(),
        }
    }

    fn push(&mut self, bit: DigitalChannel) {
        self.rest.push(bit);
    }

    /// The channel that opened the slot; it supplies the `slist` word.
    pub fn first(&self) -> DigitalChannel {
        self.first
    }

    /// Channels in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &DigitalChannel> + '_ {
        std::iter::once(&self.first).chain(self.rest.iter())
    }
}

impl Slot {
    /// Bytes this slot occupies in a scan cycle.
    pub fn width(&self) -> usize {
        match self {
            Slot::Channel(channel) => channel.width(),
            Slot::Digital(_) => DIGITAL_WIDTH,
        }
    }

    /// `slist` configuration word of this slot.
    pub fn configuration_word(&self) -> u16 {
        match self {
            Slot::Channel(channel) => channel.configuration_word(),
            Slot::Digital(bits) => Channel::Digital(bits.first()).configuration_word(),
        }
    }
}

/// A slot together with its byte window inside one scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotLayout {
    /// Byte range within the cycle
    pub window: Range<usize>,
    /// The slot
    pub slot: Slot,
}

/// Commands that configure the device for a scan list, plus the resulting cycle width.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanListEncoding {
    /// Commands in transmission order
    pub commands: Vec<Command>,
    /// Bytes per scan cycle
    pub cycle_width: usize,
}

/// Ordered set of channels sampled once per scan cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanList {
    slots: Vec<Slot>,
}

impl ScanList {
    /// Create an empty scan list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scan list from channels in scan order.
    pub fn from_channels<I, C>(channels: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Channel>,
    {
        let mut list = Self::new();
        for channel in channels {
            list.add(channel)?;
        }
        Ok(list)
    }

    /// Append a channel.
    ///
    /// # Errors
    /// - `ScanListFull` if the channel needs a new slot and all [`MAX_SLOTS`] are taken
    /// - `DuplicateSlot` if a channel with the same identity is already present
    /// - `InvalidConfiguration` if its filter decimation disagrees with an earlier channel;
    ///   decimation is a device-wide setting
    pub fn add(&mut self, channel: impl Into<Channel>) -> AppResult<()> {
        let channel = channel.into();
        let id = channel.id();

        let needs_slot = !(matches!(channel, Channel::Digital(_)) && self.digital_slot().is_some());
        if needs_slot && self.slots.len() >= MAX_SLOTS {
            return Err(DaqError::ScanListFull {
                capacity: MAX_SLOTS,
            });
        }

        if self.contains(id) {
            return Err(DaqError::DuplicateSlot(id));
        }

        if let (Some(filter), Some(existing)) = (channel.filter(), self.decimation()) {
            if filter.decimation != existing {
                return Err(DaqError::InvalidConfiguration(format!(
                    "{id} uses decimation {}, but the scan list already uses {existing}",
                    filter.decimation
                )));
            }
        }

        match channel {
            Channel::Digital(bit) => match self.digital_slot_mut() {
                Some(bits) => bits.push(bit),
                None => self.slots.push(Slot::Digital(DigitalBits::new(bit))),
            },
            other => self.slots.push(Slot::Channel(other)),
        }

        debug!(channel = %id, slots = self.slots.len(), "added channel to scan list");
        Ok(())
    }

    /// Fail with `EmptyScanList` if no channels are present.
    pub fn validate(&self) -> AppResult<()> {
        if self.slots.is_empty() {
            return Err(DaqError::EmptyScanList);
        }
        Ok(())
    }

    /// Commands to configure the device, in order, and the scan-cycle width.
    ///
    /// Order: packet size, one `slist` per slot, the digital direction mask (when the list
    /// has digital channels), per-channel filter commands, then the shared decimation.
    pub fn encode(&self) -> AppResult<ScanListEncoding> {
        self.validate()?;

        let mut commands = vec![Command::PacketSize(self.packet_size())];

        for (offset, slot) in self.slots.iter().enumerate() {
            commands.push(Command::ScanListEntry {
                offset: offset as u8,
                config: slot.configuration_word(),
            });
        }

        if self.digital_slot().is_some() {
            commands.push(Command::DigitalDirection(self.output_mask()));
        }

        for channel in self.channels() {
            commands.extend(channel.setup_commands());
        }

        if let Some(decimation) = self.decimation() {
            commands.push(Command::Decimation(decimation));
        }

        Ok(ScanListEncoding {
            commands,
            cycle_width: self.cycle_width(),
        })
    }

    /// Slots with their byte windows, in scan order.
    pub fn layout(&self) -> Vec<SlotLayout> {
        let mut offset = 0;
        self.slots
            .iter()
            .map(|slot| {
                let width = slot.width();
                let window = offset..offset + width;
                offset += width;
                SlotLayout {
                    window,
                    slot: slot.clone(),
                }
            })
            .collect()
    }

    /// Device packet size used for this list.
    pub fn packet_size(&self) -> PacketSize {
        PacketSize::for_slots(self.slots.len())
    }

    /// Bytes per scan cycle: the sum of all slot widths.
    pub fn cycle_width(&self) -> usize {
        self.slots.iter().map(Slot::width).sum()
    }

    /// Hardware slots in scan order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Channels in scan order, digital channels expanded in place.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.slots.iter().flat_map(|slot| match slot {
            Slot::Channel(channel) => vec![*channel],
            Slot::Digital(bits) => bits.iter().map(|bit| Channel::Digital(*bit)).collect(),
        })
    }

    /// Channel identities in scan order.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels().map(|channel| channel.id()).collect()
    }

    /// Whether a channel with this identity is present.
    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels().any(|channel| channel.id() == id)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels().count()
    }

    /// Whether the scan list has no channels.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bits configured as outputs by digital channels in this list.
    pub fn output_mask(&self) -> u8 {
        self.digital_slot()
            .map(|bits| {
                bits.iter()
                    .filter(|bit| bit.direction() == Direction::Output)
                    .fold(0u8, |mask, bit| mask | (1 << bit.bit()))
            })
            .unwrap_or(0)
    }

    fn decimation(&self) -> Option<u16> {
        self.channels()
            .find_map(|channel| channel.filter())
            .map(|filter| filter.decimation)
    }

    fn digital_slot(&self) -> Option<&DigitalBits> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Digital(bits) => Some(bits),
            Slot::Channel(_) => None,
        })
    }

    fn digital_slot_mut(&mut self) -> Option<&mut DigitalBits> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Digital(bits) => Some(bits),
            Slot::Channel(_) => None,
        })
    }
}
