//! Read-only snapshots of admission state.

use serde::Serialize;

use super::penalty::PenaltyManager;
use super::profile::HOUR_MS;
use super::window::WindowCounter;

/// How many identifiers the volume ranking keeps.
pub const TOP_IDENTIFIERS: usize = 10;

/// Request volume of one identifier over the last hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierVolume {
    pub identifier: String,
    pub requests: usize,
}

/// Point-in-time view of the admission subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub active_windows: usize,
    pub active_bans: usize,
    pub recent_violations: usize,
    pub queue_depth: usize,
    /// Busiest identifiers first
    pub top_identifiers_by_volume: Vec<IdentifierVolume>,
}

impl Statistics {
    pub fn collect(
        counter: &WindowCounter,
        penalties: &PenaltyManager,
        queue_depth: usize,
        now_ms: u64,
    ) -> Self {
        let mut volumes: Vec<IdentifierVolume> = counter
            .global_volumes(HOUR_MS, now_ms)
            .into_iter()
            .map(|(identifier, requests)| IdentifierVolume {
                identifier,
                requests,
            })
            .collect();
        volumes.sort_by(|a, b| {
            b.requests
                .cmp(&a.requests)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        volumes.truncate(TOP_IDENTIFIERS);

        Self {
            active_windows: counter.len(),
            active_bans: penalties.active_ban_count(),
            recent_violations: penalties.recent_violation_count(),
            queue_depth,
            top_identifiers_by_volume: volumes,
        }
    }
}
