//! Admission verdicts and the vocabulary they are built from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How serious a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Advisory only, never changes the progressive delay
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Factor applied to the progressive delay for a violation of this severity.
    ///
    /// `Low` returns `None`: warnings are logged but do not escalate.
    pub fn delay_multiplier(&self) -> Option<u64> {
        match self {
            Severity::Low => None,
            Severity::Medium => Some(1),
            Severity::High => Some(2),
            Severity::Critical => Some(4),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller role class, resolved by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anonymous,
    Authenticated,
    Elevated,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anonymous" | "guest" => Ok(Role::Anonymous),
            "authenticated" | "user" => Ok(Role::Authenticated),
            "elevated" | "admin" => Ok(Role::Elevated),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Why a retryable denial happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Endpoint burst window is full
    BurstLimitExceeded,
    /// Identifier-wide burst window is full
    GlobalBurstExceeded,
    MinuteLimitExceeded,
    HourLimitExceeded,
    EndpointLimitExceeded,
    RoleLimitExceeded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::BurstLimitExceeded => "burst_limit_exceeded",
            DenyReason::GlobalBurstExceeded => "global_burst_exceeded",
            DenyReason::MinuteLimitExceeded => "minute_limit_exceeded",
            DenyReason::HourLimitExceeded => "hour_limit_exceeded",
            DenyReason::EndpointLimitExceeded => "endpoint_limit_exceeded",
            DenyReason::RoleLimitExceeded => "role_limit_exceeded",
        }
    }

    /// Severity recorded against the identifier when this denial happens.
    pub fn severity(&self) -> Severity {
        match self {
            DenyReason::BurstLimitExceeded | DenyReason::GlobalBurstExceeded => Severity::High,
            DenyReason::MinuteLimitExceeded
            | DenyReason::HourLimitExceeded
            | DenyReason::EndpointLimitExceeded
            | DenyReason::RoleLimitExceeded => Severity::Medium,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a terminal ban denial happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanCause {
    /// An existing ban is still active
    Banned,
    /// This very request crossed the abuse ban threshold
    SecurityBan,
}

impl BanCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanCause::Banned => "banned",
            BanCause::SecurityBan => "security_ban",
        }
    }
}

impl fmt::Display for BanCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one request against every limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request may proceed. `flagged` marks traffic above the
    /// suspicious threshold.
    Allow { flagged: bool },
    /// The request may be retried after `retry_after`.
    DenyRetryable {
        reason: DenyReason,
        retry_after: Duration,
        severity: Severity,
    },
    /// The identifier is banned; never retried automatically.
    DenyBanned {
        cause: BanCause,
        retry_after: Duration,
        expires_at_ms: u64,
    },
}

impl Verdict {
    pub fn allow() -> Self {
        Verdict::Allow { flagged: false }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    /// Reason string used in logs and diagnostics.
    pub fn reason(&self) -> &'static str {
        match self {
            Verdict::Allow { .. } => "allowed",
            Verdict::DenyRetryable { reason, .. } => reason.as_str(),
            Verdict::DenyBanned { cause, .. } => cause.as_str(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Verdict::Allow { .. } => None,
            Verdict::DenyRetryable { retry_after, .. } | Verdict::DenyBanned { retry_after, .. } => {
                Some(*retry_after)
            }
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Verdict::Allow { .. } => None,
            Verdict::DenyRetryable { severity, .. } => Some(*severity),
            Verdict::DenyBanned { .. } => Some(Severity::Critical),
        }
    }
}
