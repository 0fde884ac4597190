//! Sliding window event counter.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::key::WindowKey;

/// Event timestamps recorded for a single window key.
#[derive(Debug, Default)]
struct WindowRecord {
    /// Event timestamps in ascending order
    events: VecDeque<u64>,
    /// Largest window ever queried for this key, in milliseconds
    horizon_ms: u64,
    /// Timestamp of the most recent event
    last_event_ms: u64,
}

impl WindowRecord {
    fn insert(&mut self, timestamp_ms: u64) {
        match self.events.back() {
            Some(&last) if last > timestamp_ms => {
                let idx = self.events.partition_point(|&t| t <= timestamp_ms);
                self.events.insert(idx, timestamp_ms);
            }
            _ => self.events.push_back(timestamp_ms),
        }
        self.last_event_ms = self.last_event_ms.max(timestamp_ms);
    }

    /// Drop events that fall outside the largest window seen so far.
    fn prune(&mut self, now_ms: u64) {
        if self.horizon_ms == 0 {
            return;
        }
        let cutoff = now_ms.saturating_sub(self.horizon_ms);
        while let Some(&front) = self.events.front() {
            if front <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count events in `(now - window, now]`.
    fn count_in(&self, window_ms: u64, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(window_ms);
        let lower = self.events.partition_point(|&t| t <= cutoff);
        let upper = self.events.partition_point(|&t| t <= now_ms);
        upper.saturating_sub(lower)
    }
}

/// Tracks timestamped events per key and answers sliding window counts.
///
/// One append-only list per key serves every window length queried against
/// it, so a burst window and a per-minute window never double-book an event.
#[derive(Debug, Default)]
pub struct WindowCounter {
    records: DashMap<WindowKey, WindowRecord>,
    /// Horizon every new record starts with
    retention_ms: u64,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counter whose records keep at least `retention_ms` of
    /// history, even before their first query.
    pub fn with_retention(retention_ms: u64) -> Self {
        Self {
            records: DashMap::new(),
            retention_ms,
        }
    }

    /// Append an event for `key` at `timestamp_ms`.
    pub fn record(&self, key: &WindowKey, timestamp_ms: u64) {
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| WindowRecord {
                horizon_ms: self.retention_ms,
                ..Default::default()
            });
        record.insert(timestamp_ms);

        trace!(key = %key, events = record.events.len(), "Recorded event");
    }

    /// Count events with `timestamp > now - window`.
    ///
    /// Widens the key's retention horizon to `window_ms` if needed and prunes
    /// events older than that horizon. A missing key counts as zero.
    pub fn count_since(&self, key: &WindowKey, window_ms: u64, now_ms: u64) -> usize {
        let Some(mut record) = self.records.get_mut(key) else {
            return 0;
        };

        record.horizon_ms = record.horizon_ms.max(window_ms);
        record.prune(now_ms);
        let count = record.count_in(window_ms, now_ms);

        trace!(key = %key, window_ms, count, "Counted window events");
        count
    }

    /// Count several windows of one key in a single pass.
    ///
    /// The horizon is widened to the largest requested window before pruning,
    /// so querying a short window never discards events a longer one needs.
    pub fn count_windows(&self, key: &WindowKey, windows_ms: &[u64], now_ms: u64) -> Vec<usize> {
        let Some(mut record) = self.records.get_mut(key) else {
            return vec![0; windows_ms.len()];
        };

        let widest = windows_ms.iter().copied().max().unwrap_or(0);
        record.horizon_ms = record.horizon_ms.max(widest);
        record.prune(now_ms);

        windows_ms
            .iter()
            .map(|&window_ms| record.count_in(window_ms, now_ms))
            .collect()
    }

    /// Count events like [`count_since`](Self::count_since) without pruning.
    pub fn peek(&self, key: &WindowKey, window_ms: u64, now_ms: u64) -> usize {
        self.records
            .get(key)
            .map(|record| record.count_in(window_ms, now_ms))
            .unwrap_or(0)
    }

    /// Event volume of every identifier-wide key within `window_ms`.
    pub fn global_volumes(&self, window_ms: u64, now_ms: u64) -> Vec<(String, usize)> {
        self.records
            .iter()
            .filter(|entry| entry.key().is_global())
            .map(|entry| (entry.key().identifier.clone(), entry.count_in(window_ms, now_ms)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Remove records that are empty and idle for at least `idle_ms`.
    ///
    /// Identifiers in `retain` are skipped regardless of state. Returns the
    /// number of records removed.
    pub fn sweep_idle(&self, now_ms: u64, idle_ms: u64, retain: &HashSet<String>) -> usize {
        let before = self.records.len();
        let idle_cutoff = now_ms.saturating_sub(idle_ms);

        self.records.retain(|key, record| {
            if retain.contains(&key.identifier) {
                return true;
            }
            record.prune(now_ms);
            // A record that was never queried has no horizon to prune by
            let reclaimable = record.events.is_empty() || record.horizon_ms == 0;
            !(reclaimable && record.last_event_ms <= idle_cutoff)
        });

        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, remaining = self.records.len(), "Swept idle window records");
        }
        removed
    }

    /// Get the number of active window records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}
