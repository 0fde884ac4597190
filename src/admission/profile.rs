//! Limit profiles and thresholds.
//!
//! Profiles are configuration: loaded once and immutable while the gate runs.
//! Endpoint classes map to a [`LimitProfile`] either by exact name or through
//! a route pattern ending in `*`, where the longest matching prefix wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::verdict::Role;
use crate::error::{GatekeeperError, Result};

pub const MINUTE_MS: u64 = 60_000;
pub const HOUR_MS: u64 = 3_600_000;

/// Every limit the evaluator applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Identifier-wide limits across all endpoints
    #[serde(default)]
    pub global: GlobalLimits,
    /// Window limit per role class
    #[serde(default)]
    pub roles: RoleLimits,
    /// Suspicious and ban thresholds
    #[serde(default)]
    pub abuse: AbuseConfig,
    /// Map of endpoint class or route pattern to its profile
    #[serde(default)]
    pub endpoints: HashMap<String, LimitProfile>,
}

/// Burst and window limits for a single endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitProfile {
    pub burst_limit: u64,
    pub burst_window_ms: u64,
    pub window_limit: u64,
    pub window_ms: u64,
}

/// Identifier-wide limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLimits {
    #[serde(default = "default_global_burst_limit")]
    pub burst_limit: u64,
    #[serde(default = "default_global_burst_window")]
    pub burst_window_ms: u64,
    #[serde(default = "default_minute_limit")]
    pub minute_limit: u64,
    #[serde(default = "default_hour_limit")]
    pub hour_limit: u64,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            burst_limit: default_global_burst_limit(),
            burst_window_ms: default_global_burst_window(),
            minute_limit: default_minute_limit(),
            hour_limit: default_hour_limit(),
        }
    }
}

fn default_global_burst_limit() -> u64 {
    100
}

fn default_global_burst_window() -> u64 {
    10_000
}

fn default_minute_limit() -> u64 {
    600
}

fn default_hour_limit() -> u64 {
    10_000
}

/// A limit over a window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub limit: u64,
    pub window_ms: u64,
}

impl WindowLimit {
    pub const fn per_minute(limit: u64) -> Self {
        Self {
            limit,
            window_ms: MINUTE_MS,
        }
    }
}

/// Window limits by role class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLimits {
    #[serde(default = "default_anonymous")]
    pub anonymous: WindowLimit,
    #[serde(default = "default_authenticated")]
    pub authenticated: WindowLimit,
    #[serde(default = "default_elevated")]
    pub elevated: WindowLimit,
}

impl Default for RoleLimits {
    fn default() -> Self {
        Self {
            anonymous: default_anonymous(),
            authenticated: default_authenticated(),
            elevated: default_elevated(),
        }
    }
}

fn default_anonymous() -> WindowLimit {
    WindowLimit::per_minute(60)
}

fn default_authenticated() -> WindowLimit {
    WindowLimit::per_minute(600)
}

fn default_elevated() -> WindowLimit {
    WindowLimit::per_minute(1_200)
}

impl RoleLimits {
    pub fn for_role(&self, role: Role) -> WindowLimit {
        match role {
            Role::Anonymous => self.anonymous,
            Role::Authenticated => self.authenticated,
            Role::Elevated => self.elevated,
        }
    }
}

/// Per-minute abuse thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Requests per minute above which traffic is flagged
    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: u64,
    /// Requests per minute above which the identifier is banned
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u64,
    #[serde(default = "default_ban_duration")]
    pub ban_duration_ms: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            suspicious_threshold: default_suspicious_threshold(),
            ban_threshold: default_ban_threshold(),
            ban_duration_ms: default_ban_duration(),
        }
    }
}

fn default_suspicious_threshold() -> u64 {
    300
}

fn default_ban_threshold() -> u64 {
    500
}

fn default_ban_duration() -> u64 {
    900_000
}

impl LimitsConfig {
    /// Find the profile for an endpoint class.
    ///
    /// An exact entry takes precedence over patterns. Among `*` patterns the
    /// longest matching prefix is the most specific one. Returns the matched
    /// class name (the exact name or the pattern) with its profile; events
    /// are counted under that class so every path of a pattern shares one
    /// budget.
    pub fn find_profile(&self, endpoint: &str) -> Option<(&str, &LimitProfile)> {
        if endpoint.is_empty() {
            return None;
        }
        if let Some((class, profile)) = self.endpoints.get_key_value(endpoint) {
            return Some((class.as_str(), profile));
        }

        let mut best_match: Option<(usize, &str, &LimitProfile)> = None;
        for (pattern, profile) in &self.endpoints {
            let Some(prefix) = pattern.strip_suffix('*') else {
                continue;
            };
            if !endpoint.starts_with(prefix) {
                continue;
            }
            match best_match {
                Some((len, _, _)) if len >= prefix.len() => {}
                _ => best_match = Some((prefix.len(), pattern.as_str(), profile)),
            }
        }

        best_match.map(|(_, class, profile)| (class, profile))
    }

    /// The longest window any check reads, which bounds how much history a
    /// window record must keep.
    pub fn longest_window_ms(&self) -> u64 {
        let roles = [
            self.roles.anonymous.window_ms,
            self.roles.authenticated.window_ms,
            self.roles.elevated.window_ms,
        ];
        let endpoints = self
            .endpoints
            .values()
            .flat_map(|p| [p.burst_window_ms, p.window_ms]);

        roles
            .into_iter()
            .chain(endpoints)
            .chain([self.global.burst_window_ms, MINUTE_MS, HOUR_MS])
            .max()
            .unwrap_or(HOUR_MS)
    }

    /// Reject limits that would make the evaluator misbehave.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GatekeeperError::Config(msg));

        if self.global.burst_window_ms == 0 {
            return invalid("limits.global.burst_window_ms must be greater than zero".to_string());
        }
        for (name, limit) in [
            ("anonymous", self.roles.anonymous),
            ("authenticated", self.roles.authenticated),
            ("elevated", self.roles.elevated),
        ] {
            if limit.window_ms == 0 {
                return invalid(format!("limits.roles.{}.window_ms must be greater than zero", name));
            }
        }
        for (endpoint, profile) in &self.endpoints {
            if profile.burst_window_ms == 0 || profile.window_ms == 0 {
                return invalid(format!("endpoint '{}' has a zero-length window", endpoint));
            }
        }
        if self.abuse.ban_threshold <= self.abuse.suspicious_threshold {
            return invalid(format!(
                "limits.abuse.ban_threshold ({}) must exceed suspicious_threshold ({})",
                self.abuse.ban_threshold, self.abuse.suspicious_threshold
            ));
        }
        if self.abuse.ban_duration_ms == 0 {
            return invalid("limits.abuse.ban_duration_ms must be greater than zero".to_string());
        }

        Ok(())
    }
}
