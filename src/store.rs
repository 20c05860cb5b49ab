//! Latest-value cache
//!
//! One `watch` cell per channel of the active scan list. The acquisition loop is the only
//! writer; any number of callers read the latest reading or subscribe to updates. Writing
//! never waits for readers.

use crate::channel::{ChannelId, Fault, Value};
use crate::decoder::Cycle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Last decoded value of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Engineering value
    pub value: Value,
    /// Fault flag
    pub fault: Option<Fault>,
    /// Scan cycle the value came from
    pub cycle: u64,
    /// When the cycle was published
    pub timestamp: DateTime<Utc>,
}

type Cell = watch::Sender<Option<Reading>>;

#[derive(Default)]
struct Cells {
    order: Vec<ChannelId>,
    by_id: HashMap<ChannelId, Cell>,
}

/// Concurrent map from channel identity to its latest [`Reading`].
#[derive(Default)]
pub struct ValueStore {
    cells: RwLock<Cells>,
}

impl ValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all entries with empty cells for `ids`.
    pub fn activate(&self, ids: impl IntoIterator<Item = ChannelId>) {
        let mut cells = self.write();
        cells.by_id.clear();
        cells.order.clear();
        for id in ids {
            if cells.by_id.insert(id, watch::channel(None).0).is_none() {
                cells.order.push(id);
            }
        }
    }

    /// Publish every sample of `cycle`.
    pub fn publish(&self, cycle: &Cycle) {
        let timestamp = Utc::now();
        let cells = self.read();
        for sample in &cycle.samples {
            if let Some(cell) = cells.by_id.get(&sample.channel) {
                cell.send_replace(Some(Reading {
                    value: sample.value,
                    fault: sample.fault,
                    cycle: cycle.sequence,
                    timestamp,
                }));
            }
        }
    }

    /// Latest reading of `id`; `None` if the channel is not active or not yet sampled.
    pub fn get(&self, id: ChannelId) -> Option<Reading> {
        self.read()
            .by_id
            .get(&id)
            .and_then(|cell| *cell.borrow())
    }

    /// Receiver notified on every update of `id`.
    ///
    /// The receiver reports closure once the store is reset or reactivated.
    pub fn subscribe(&self, id: ChannelId) -> Option<watch::Receiver<Option<Reading>>> {
        self.read().by_id.get(&id).map(watch::Sender::subscribe)
    }

    /// All sampled readings in scan order.
    pub fn snapshot(&self) -> Vec<(ChannelId, Reading)> {
        let cells = self.read();
        cells
            .order
            .iter()
            .filter_map(|id| {
                let reading = (*cells.by_id.get(id)?.borrow())?;
                Some((*id, reading))
            })
            .collect()
    }

    /// Active channel identities in scan order.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.read().order.clone()
    }

    /// Whether no channel is active.
    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// Remove all entries.
    pub fn reset(&self) {
        let mut cells = self.write();
        cells.by_id.clear();
        cells.order.clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Cells> {
        self.cells.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Cells> {
        self.cells.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoded;

    fn cycle(sequence: u64, volts: f64) -> Cycle {
        Cycle {
            sequence,
            samples: vec![
                Decoded {
                    channel: ChannelId::Analog(0),
                    value: Value::Volts(volts),
                    fault: None,
                },
                Decoded {
                    channel: ChannelId::Count,
                    value: Value::Counts(7),
                    fault: None,
                },
            ],
        }
    }

    #[test]
    fn not_sampled_until_first_cycle() {
        let store = ValueStore::new();
        store.activate([ChannelId::Analog(0), ChannelId::Count]);
        assert!(store.get(ChannelId::Analog(0)).is_none());
        assert!(store.snapshot().is_empty());
        assert_eq!(store.channels(), vec![ChannelId::Analog(0), ChannelId::Count]);
    }

    #[test]
    fn keeps_latest_reading() {
        let store = ValueStore::new();
        store.activate([ChannelId::Analog(0), ChannelId::Count]);
        store.publish(&cycle(0, 1.0));
        store.publish(&cycle(1, 2.0));

        let reading = store.get(ChannelId::Analog(0)).unwrap();
        assert_eq!(reading.value, Value::Volts(2.0));
        assert_eq!(reading.cycle, 1);
        assert_eq!(store.snapshot().len(), 2);
        assert!(store.get(ChannelId::Rate).is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let store = ValueStore::new();
        store.activate([ChannelId::Analog(0), ChannelId::Count]);
        store.publish(&cycle(0, 1.0));
        store.reset();

        assert!(store.is_empty());
        assert!(store.get(ChannelId::Analog(0)).is_none());
        // Publishing after reset is a no-op.
        store.publish(&cycle(1, 1.0));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_updates_and_reset() {
        let store = ValueStore::new();
        store.activate([ChannelId::Analog(0)]);
        let mut rx = store.subscribe(ChannelId::Analog(0)).unwrap();

        store.publish(&cycle(0, 3.0));
        rx.changed().await.unwrap();
        let latest = *rx.borrow_and_update();
        assert_eq!(latest.map(|r| r.value), Some(Value::Volts(3.0)));

        store.reset();
        assert!(rx.changed().await.is_err());
    }
}
