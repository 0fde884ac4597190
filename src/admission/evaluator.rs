//! Multi-tier limit evaluation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::key::WindowKey;
use super::penalty::PenaltyManager;
use super::window::WindowCounter;
use super::profile::{LimitsConfig, HOUR_MS, MINUTE_MS};
use super::verdict::{BanCause, DenyReason, Role, Severity, Verdict};
use crate::error::Result;

/// Violation reason logged when traffic crosses the suspicious threshold.
pub const SUSPICIOUS_ACTIVITY: &str = "suspicious_activity";

/// Runs the ordered limit checks for one request.
///
/// Checks run in a fixed order and the first failing one decides the verdict:
/// ban, burst (endpoint then identifier-wide), per-minute, per-hour,
/// per-endpoint window, per-role window, abuse thresholds. Evaluation never
/// records events; the admission gate does that for allowed requests only.
pub struct LimitEvaluator {
    limits: Arc<LimitsConfig>,
    counter: Arc<WindowCounter>,
    penalties: Arc<PenaltyManager>,
    clock: Arc<dyn Clock>,
}

impl LimitEvaluator {
    pub fn new(
        limits: Arc<LimitsConfig>,
        counter: Arc<WindowCounter>,
        penalties: Arc<PenaltyManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            counter,
            penalties,
            clock,
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Evaluate a request from `identifier` on `endpoint` with `role`.
    ///
    /// An unknown role is a configuration defect: it is logged and the role
    /// check is skipped. Only store failures surface as errors.
    pub async fn evaluate(&self, identifier: &str, endpoint: &str, role: &str) -> Result<Verdict> {
        if let Some(ban) = self.penalties.ban_status(identifier).await? {
            let now = self.clock.now_ms();
            debug!(identifier = %identifier, reason = %ban.reason, "Request from banned identifier");
            return Ok(Verdict::DenyBanned {
                cause: BanCause::Banned,
                retry_after: Duration::from_millis(ban.remaining_ms(now)),
                expires_at_ms: ban.expires_at_ms,
            });
        }

        let now = self.clock.now_ms();
        let role = match role.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                warn!(identifier = %identifier, error = %e, "Invalid role, applying global limits only");
                None
            }
        };
        let profile = self.limits.find_profile(endpoint);
        if profile.is_none() && !endpoint.is_empty() {
            trace!(endpoint = %endpoint, "No profile for endpoint");
        }

        let global = &self.limits.global;
        let role_limit = role.map(|r| self.limits.roles.for_role(r));

        let mut global_windows = vec![global.burst_window_ms, MINUTE_MS, HOUR_MS];
        if let Some(limit) = role_limit {
            global_windows.push(limit.window_ms);
        }
        let global_counts =
            self.counter
                .count_windows(&WindowKey::global(identifier), &global_windows, now);
        let (global_burst, per_minute, per_hour) =
            (global_counts[0], global_counts[1], global_counts[2]);

        let endpoint_counts = profile.map(|(class, p)| {
            self.counter.count_windows(
                &WindowKey::new(identifier, class),
                &[p.burst_window_ms, p.window_ms],
                now,
            )
        });

        trace!(
            identifier = %identifier,
            endpoint = %endpoint,
            global_burst,
            per_minute,
            per_hour,
            "Evaluating limits"
        );

        if let (Some((_, p)), Some(counts)) = (profile, endpoint_counts.as_ref()) {
            if at_limit(counts[0], p.burst_limit) {
                return Ok(deny(DenyReason::BurstLimitExceeded, p.burst_window_ms));
            }
        }
        if at_limit(global_burst, global.burst_limit) {
            return Ok(deny(DenyReason::GlobalBurstExceeded, global.burst_window_ms));
        }
        if at_limit(per_minute, global.minute_limit) {
            return Ok(deny(DenyReason::MinuteLimitExceeded, MINUTE_MS));
        }
        if at_limit(per_hour, global.hour_limit) {
            return Ok(deny(DenyReason::HourLimitExceeded, HOUR_MS));
        }
        if let (Some((_, p)), Some(counts)) = (profile, endpoint_counts.as_ref()) {
            if at_limit(counts[1], p.window_limit) {
                return Ok(deny(DenyReason::EndpointLimitExceeded, p.window_ms));
            }
        }
        if let Some(limit) = role_limit {
            if at_limit(global_counts[3], limit.limit) {
                return Ok(deny(DenyReason::RoleLimitExceeded, limit.window_ms));
            }
        }

        // Thresholds compare the per-minute rate including this request
        let abuse = &self.limits.abuse;
        let projected = per_minute as u64 + 1;
        if projected > abuse.ban_threshold {
            let record = self
                .penalties
                .ban(
                    identifier,
                    BanCause::SecurityBan.as_str(),
                    Duration::from_millis(abuse.ban_duration_ms),
                )
                .await?;
            return Ok(Verdict::DenyBanned {
                cause: BanCause::SecurityBan,
                retry_after: Duration::from_millis(abuse.ban_duration_ms),
                expires_at_ms: record.expires_at_ms,
            });
        }
        if projected > abuse.suspicious_threshold {
            self.penalties
                .record_violation(identifier, SUSPICIOUS_ACTIVITY, Severity::Low);
            return Ok(Verdict::Allow { flagged: true });
        }

        Ok(Verdict::allow())
    }
}

/// Whether admitting one more request would go past `limit`.
fn at_limit(count: usize, limit: u64) -> bool {
    count as u64 >= limit
}

fn deny(reason: DenyReason, window_ms: u64) -> Verdict {
    Verdict::DenyRetryable {
        reason,
        retry_after: Duration::from_millis(window_ms),
        severity: reason.severity(),
    }
}
