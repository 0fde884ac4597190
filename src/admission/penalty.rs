//! Ban records, violation logs and progressive delays.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::{BanRecord, BanStore};
use super::verdict::Severity;
use crate::config::PenaltyConfig;
use crate::error::{GatekeeperError, Result};

/// One entry of an identifier's violation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub timestamp_ms: u64,
    pub reason: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy)]
struct DelayState {
    delay_ms: u64,
    last_decay_ms: u64,
}

/// Owns ban records, violation logs and progressive delay state.
///
/// Bans are binary: an identifier is either clean or banned until the ban
/// expires or is reset. Violations below a ban raise an artificial delay that
/// decays back to zero on a fixed schedule.
pub struct PenaltyManager {
    config: PenaltyConfig,
    bans: DashMap<String, BanRecord>,
    violations: DashMap<String, VecDeque<Violation>>,
    delays: DashMap<String, DelayState>,
    store: Arc<dyn BanStore>,
    clock: Arc<dyn Clock>,
}

impl PenaltyManager {
    pub fn new(config: PenaltyConfig, store: Arc<dyn BanStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            bans: DashMap::new(),
            violations: DashMap::new(),
            delays: DashMap::new(),
            store,
            clock,
        }
    }

    /// Load persisted bans into memory, purging the expired ones.
    ///
    /// Returns the number of active bans restored.
    pub async fn restore(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut restored = 0;

        for record in self.store.load_all().await? {
            if record.is_active(now) {
                self.bans.insert(record.identifier.clone(), record);
                restored += 1;
            } else {
                self.store.remove(&record.identifier).await?;
            }
        }

        info!(restored, "Restored persisted bans");
        Ok(restored)
    }

    /// The active ban for an identifier, if any.
    ///
    /// Expired records are removed from memory and from the store on the way.
    /// A memory miss falls through to the store.
    pub async fn ban_status(&self, identifier: &str) -> Result<Option<BanRecord>> {
        let now = self.clock.now_ms();

        let cached = self.bans.get(identifier).map(|r| r.value().clone());
        if let Some(record) = cached {
            if record.is_active(now) {
                return Ok(Some(record));
            }
            self.expire(identifier, now).await?;
            return Ok(None);
        }

        match self.store.load(identifier).await? {
            Some(record) if record.is_active(now) => {
                debug!(identifier = %identifier, "Loaded ban from store");
                self.bans.insert(identifier.to_string(), record.clone());
                Ok(Some(record))
            }
            Some(_) => {
                self.store.remove(identifier).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn is_banned(&self, identifier: &str) -> Result<bool> {
        Ok(self.ban_status(identifier).await?.is_some())
    }

    async fn expire(&self, identifier: &str, now: u64) -> Result<()> {
        let removed = self
            .bans
            .remove_if(identifier, |_, record| !record.is_active(now))
            .is_some();
        if removed {
            info!(identifier = %identifier, "Ban expired");
            self.store.remove(identifier).await?;
        }
        Ok(())
    }

    /// Ban an identifier for `duration`.
    ///
    /// An existing ban that already outlasts the new one is kept as is.
    /// New bans are written through to the store.
    pub async fn ban(&self, identifier: &str, reason: &str, duration: Duration) -> Result<BanRecord> {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if duration_ms == 0 {
            return Err(GatekeeperError::InvalidBan(format!(
                "ban for {} needs a positive duration",
                identifier
            )));
        }

        let now = self.clock.now_ms();
        let candidate = BanRecord {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
            created_at_ms: now,
            expires_at_ms: now.saturating_add(duration_ms),
        };

        let record = {
            let mut entry = self
                .bans
                .entry(identifier.to_string())
                .or_insert_with(|| candidate.clone());
            if entry.is_active(now) && entry.expires_at_ms > candidate.expires_at_ms {
                debug!(identifier = %identifier, "Existing ban outlasts the new one");
                return Ok(entry.clone());
            }
            *entry = candidate;
            entry.clone()
        };

        warn!(
            identifier = %identifier,
            reason = %reason,
            duration_ms,
            expires_at_ms = record.expires_at_ms,
            "Identifier banned"
        );

        self.store.save(&record).await?;
        Ok(record)
    }

    /// Append a violation and escalate the progressive delay.
    ///
    /// The delay becomes `min(max, (current + base) * multiplier)`. Low
    /// severity entries are logged without touching the delay. Returns the
    /// identifier's delay after the update.
    pub fn record_violation(&self, identifier: &str, reason: &str, severity: Severity) -> Duration {
        let now = self.clock.now_ms();
        let logged = self.append_violation(identifier, reason, severity, now);

        let Some(multiplier) = severity.delay_multiplier() else {
            debug!(identifier = %identifier, reason = %reason, "Recorded warning");
            return self.get_delay(identifier);
        };

        let delay_ms = {
            let mut state = self
                .delays
                .entry(identifier.to_string())
                .or_insert(DelayState {
                    delay_ms: 0,
                    last_decay_ms: now,
                });
            state.delay_ms = state
                .delay_ms
                .saturating_add(self.config.base_increment_ms)
                .saturating_mul(multiplier)
                .min(self.config.max_delay_ms);
            state.delay_ms
        };

        warn!(
            identifier = %identifier,
            reason = %reason,
            severity = %severity,
            recent_violations = logged,
            delay_ms,
            "Limit violation"
        );

        Duration::from_millis(delay_ms)
    }

    fn append_violation(&self, identifier: &str, reason: &str, severity: Severity, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.config.violation_window_ms);
        let mut log = self.violations.entry(identifier.to_string()).or_default();

        log.push_back(Violation {
            timestamp_ms: now,
            reason: reason.to_string(),
            severity,
        });
        while log.front().is_some_and(|v| v.timestamp_ms <= cutoff) {
            log.pop_front();
        }
        while log.len() > self.config.max_violations {
            log.pop_front();
        }

        log.len()
    }

    /// Current progressive delay, zero if none.
    pub fn get_delay(&self, identifier: &str) -> Duration {
        self.delays
            .get(identifier)
            .map(|s| Duration::from_millis(s.delay_ms))
            .unwrap_or(Duration::ZERO)
    }

    /// Reduce every delay by one step, at most once per decay interval.
    ///
    /// Entries reaching zero are removed. Returns how many delays changed.
    pub fn decay(&self) -> usize {
        let now = self.clock.now_ms();
        let mut decayed = 0;

        self.delays.retain(|_, state| {
            if now.saturating_sub(state.last_decay_ms) >= self.config.decay_interval_ms {
                state.delay_ms = state.delay_ms.saturating_sub(self.config.decay_step_ms);
                state.last_decay_ms = now;
                decayed += 1;
            }
            state.delay_ms > 0
        });

        if decayed > 0 {
            debug!(decayed, remaining = self.delays.len(), "Decayed progressive delays");
        }
        decayed
    }

    /// Violations logged for an identifier within the violation window.
    pub fn violations(&self, identifier: &str) -> Vec<Violation> {
        let cutoff = self.clock.now_ms().saturating_sub(self.config.violation_window_ms);
        self.violations
            .get(identifier)
            .map(|log| {
                log.iter()
                    .filter(|v| v.timestamp_ms > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total violations across all identifiers within the violation window.
    pub fn recent_violation_count(&self) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(self.config.violation_window_ms);
        self.violations
            .iter()
            .map(|log| log.iter().filter(|v| v.timestamp_ms > cutoff).count())
            .sum()
    }

    /// Number of bans that have not expired yet.
    pub fn active_ban_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.bans.iter().filter(|r| r.is_active(now)).count()
    }

    /// Clear ban, violation log and delay for an identifier.
    pub async fn reset(&self, identifier: &str) -> Result<()> {
        self.bans.remove(identifier);
        self.violations.remove(identifier);
        self.delays.remove(identifier);
        self.store.remove(identifier).await?;

        info!(identifier = %identifier, "Penalties reset");
        Ok(())
    }

    /// Drop expired bans and stale violation logs.
    ///
    /// Identifiers in `retain` are left untouched. Returns the number of
    /// bans removed.
    pub async fn sweep_expired(&self, retain: &HashSet<String>) -> Result<usize> {
        let now = self.clock.now_ms();

        let expired: Vec<String> = self
            .bans
            .iter()
            .filter(|r| !r.is_active(now) && !retain.contains(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for identifier in &expired {
            self.expire(identifier, now).await?;
        }

        let cutoff = now.saturating_sub(self.config.violation_window_ms);
        self.violations.retain(|identifier, log| {
            retain.contains(identifier) || log.back().is_some_and(|v| v.timestamp_ms > cutoff)
        });

        Ok(expired.len())
    }
}
