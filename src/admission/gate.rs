//! The admission gate: the single entry point for admission-controlled work.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as Sequencer;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::evaluator::LimitEvaluator;
use super::key::WindowKey;
use super::maintenance::{self, MaintenanceHandle, SweepReport};
use super::penalty::PenaltyManager;
use super::retry::{self, BatchItem, BatchOptions, BatchReport, QueuedRequest, RetryScheduler};
use super::stats::Statistics;
use super::store::{BanRecord, BanStore, FileBanStore, MemoryBanStore};
use super::verdict::{BanCause, Severity, Verdict};
use super::window::WindowCounter;
use crate::config::{GatekeeperConfig, StoreConfig};
use crate::error::{GatekeeperError, Result};

/// Who is asking for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A fresh submission from calling code
    Caller,
    /// A re-submission from the retry scheduler
    Retry,
}

/// Admission-controlled execution of caller operations.
///
/// Every request is evaluated against the configured limits. Allowed
/// requests are recorded, held for the identifier's progressive delay and
/// then executed. Banned identifiers are rejected at once. Any other denial
/// is handed to the retry scheduler and settles later.
///
/// Evaluation and bookkeeping for one identifier happen under a FIFO lock, so
/// state changes apply in submission order. The lock is released before the
/// progressive delay and before the operation runs.
pub struct AdmissionGate {
    config: GatekeeperConfig,
    evaluator: LimitEvaluator,
    counter: Arc<WindowCounter>,
    penalties: Arc<PenaltyManager>,
    scheduler: RetryScheduler,
    clock: Arc<dyn Clock>,
    sequencers: DashMap<String, Arc<Sequencer<()>>>,
    last_sweep: Mutex<Option<SweepReport>>,
}

impl AdmissionGate {
    /// Create a gate over an existing ban store and clock.
    ///
    /// Persisted bans are not loaded; call [`restore`](Self::restore) for that.
    pub fn new(config: GatekeeperConfig, store: Arc<dyn BanStore>, clock: Arc<dyn Clock>) -> Self {
        let counter = Arc::new(WindowCounter::with_retention(
            config.limits.longest_window_ms(),
        ));
        let penalties = Arc::new(PenaltyManager::new(
            config.penalties.clone(),
            store,
            clock.clone(),
        ));
        let evaluator = LimitEvaluator::new(
            Arc::new(config.limits.clone()),
            counter.clone(),
            penalties.clone(),
            clock.clone(),
        );
        let scheduler = RetryScheduler::new(config.retry.clone());

        Self {
            config,
            evaluator,
            counter,
            penalties,
            scheduler,
            clock,
            sequencers: DashMap::new(),
            last_sweep: Mutex::new(None),
        }
    }

    /// Validate the configuration, open the configured ban store and restore
    /// persisted bans.
    pub async fn open(config: GatekeeperConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn BanStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryBanStore::new()),
            StoreConfig::File { path } => Arc::new(FileBanStore::open(path).await?),
        };

        let gate = Self::new(config, store, Arc::new(SystemClock::new()));
        gate.restore().await?;

        info!(
            endpoints = gate.config.limits.endpoints.len(),
            "Admission gate ready"
        );
        Ok(gate)
    }

    /// Load persisted bans. Returns the number of active bans restored.
    pub async fn restore(&self) -> Result<usize> {
        self.penalties.restore().await
    }

    /// Run `operation` for `identifier` once admission allows it.
    ///
    /// Returns the operation's output, or a rejection: `Banned` right away
    /// for banned identifiers, `RetriesExhausted` or `Canceled` after the
    /// retry scheduler gave up on a denied request.
    pub async fn submit<F, Fut, T>(
        &self,
        identifier: &str,
        endpoint: &str,
        role: &str,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.admit(identifier, endpoint, role, Origin::Caller).await? {
            Verdict::Allow { flagged } => {
                if flagged {
                    debug!(identifier = %identifier, endpoint = %endpoint, "Admitting flagged request");
                }
                Ok(self.execute(identifier, operation).await)
            }
            Verdict::DenyBanned {
                cause,
                retry_after,
                expires_at_ms,
            } => Err(GatekeeperError::Banned {
                identifier: identifier.to_string(),
                reason: cause.to_string(),
                retry_after,
                expires_at_ms,
            }),
            verdict @ Verdict::DenyRetryable { .. } => {
                let queued = QueuedRequest::new(
                    identifier,
                    endpoint,
                    role,
                    operation,
                    verdict,
                    self.clock.now_ms(),
                );
                self.scheduler.run(self, queued).await
            }
        }
    }

    /// Submit a list of operations in chunks of `options.concurrency`.
    pub async fn submit_batch<F, Fut, T>(
        &self,
        items: Vec<BatchItem<F>>,
        options: &BatchOptions,
    ) -> BatchReport<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        retry::run_batch(self, items, options).await
    }

    /// Evaluate one request and apply its bookkeeping.
    ///
    /// Allowed requests are recorded under the identifier-wide key and, for
    /// profiled endpoints, under the endpoint key. Retryable denials from
    /// callers escalate the identifier's penalty.
    pub(crate) async fn admit(
        &self,
        identifier: &str,
        endpoint: &str,
        role: &str,
        origin: Origin,
    ) -> Result<Verdict> {
        let sequencer = self.sequencer(identifier);
        let _turn = sequencer.lock().await;

        let verdict = self.evaluator.evaluate(identifier, endpoint, role).await?;
        match &verdict {
            Verdict::Allow { .. } => {
                let now = self.clock.now_ms();
                self.counter.record(&WindowKey::global(identifier), now);
                if let Some((class, _)) = self.evaluator.limits().find_profile(endpoint) {
                    self.counter.record(&WindowKey::new(identifier, class), now);
                }
            }
            Verdict::DenyRetryable {
                reason, severity, ..
            } if origin == Origin::Caller => {
                self.penalties
                    .record_violation(identifier, reason.as_str(), *severity);
            }
            Verdict::DenyRetryable { reason, .. } => {
                debug!(identifier = %identifier, reason = %reason, "Re-submission denied");
            }
            Verdict::DenyBanned {
                cause: BanCause::SecurityBan,
                ..
            } => {
                self.penalties.record_violation(
                    identifier,
                    BanCause::SecurityBan.as_str(),
                    Severity::Critical,
                );
            }
            Verdict::DenyBanned { cause, .. } => {
                debug!(identifier = %identifier, cause = %cause, "Request rejected by ban");
            }
        }

        Ok(verdict)
    }

    /// Hold for the identifier's progressive delay, then run `operation`.
    pub(crate) async fn execute<F, Fut, T>(&self, identifier: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let delay = self.penalties.get_delay(identifier);
        if !delay.is_zero() {
            debug!(
                identifier = %identifier,
                delay_ms = delay.as_millis() as u64,
                "Applying progressive delay"
            );
            tokio::time::sleep(delay).await;
        }
        operation().await
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn sequencer(&self, identifier: &str) -> Arc<Sequencer<()>> {
        self.sequencers
            .entry(identifier.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Clear the ban, violation log and progressive delay of `identifier` and
    /// cancel its queued retries.
    ///
    /// Returns the number of queued requests canceled.
    pub async fn reset(&self, identifier: &str) -> Result<usize> {
        self.penalties.reset(identifier).await?;
        Ok(self.scheduler.cancel(identifier))
    }

    /// Ban `identifier` for `duration`.
    pub async fn ban(&self, identifier: &str, reason: &str, duration: Duration) -> Result<BanRecord> {
        self.penalties.ban(identifier, reason, duration).await
    }

    pub async fn is_banned(&self, identifier: &str) -> Result<bool> {
        self.penalties.is_banned(identifier).await
    }

    /// Point-in-time snapshot for dashboards.
    pub fn statistics(&self) -> Statistics {
        Statistics::collect(
            &self.counter,
            &self.penalties,
            self.scheduler.queue_depth(),
            self.clock.now_ms(),
        )
    }

    /// Step every progressive delay down once its decay interval elapsed.
    pub fn decay(&self) -> usize {
        self.penalties.decay()
    }

    /// Reclaim idle windows, expired bans and idle sequencing locks.
    ///
    /// Identifiers with queued retries are left alone.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now_ms();
        let pending = self.scheduler.pending_identifiers();

        let windows = self.counter.sweep_idle(
            now,
            self.config.maintenance.cleanup_interval_ms,
            &pending,
        );
        let bans = self.penalties.sweep_expired(&pending).await?;
        let sequencers = self.sweep_sequencers(&pending);

        let report = SweepReport {
            swept_at_ms: now,
            windows,
            bans,
            sequencers,
        };
        info!(
            windows,
            bans,
            sequencers,
            retained = pending.len(),
            "Swept admission state"
        );

        *self.last_sweep.lock() = Some(report.clone());
        Ok(report)
    }

    fn sweep_sequencers(&self, retain: &HashSet<String>) -> usize {
        let before = self.sequencers.len();
        // Only the map holds an unused lock; any other holder is mid-admission
        self.sequencers.retain(|identifier, sequencer| {
            retain.contains(identifier) || Arc::strong_count(sequencer) > 1
        });
        before.saturating_sub(self.sequencers.len())
    }

    /// Result of the most recent sweep, if one ran.
    pub fn last_sweep(&self) -> Option<SweepReport> {
        self.last_sweep.lock().clone()
    }

    /// Spawn the decay and sweep tickers.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        maintenance::spawn(
            Arc::clone(self),
            self.config.penalties.decay_interval(),
            self.config.maintenance.cleanup_interval(),
        )
    }

    pub fn penalties(&self) -> &PenaltyManager {
        &self.penalties
    }

    pub fn counter(&self) -> &WindowCounter {
        &self.counter
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn queue_depth(&self) -> usize {
        self.scheduler.queue_depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::profile::{LimitProfile, LimitsConfig, WindowLimit};
    use crate::admission::clock::ManualClock;
    use crate::admission::verdict::DenyReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn profile(burst_limit: u64, window_limit: u64, window_ms: u64) -> LimitProfile {
        LimitProfile {
            burst_limit,
            burst_window_ms: 10_000,
            window_limit,
            window_ms,
        }
    }

    fn gate_with(limits: LimitsConfig) -> AdmissionGate {
        gate_with_clock(limits, Arc::new(SystemClock::new()))
    }

    fn gate_with_clock(limits: LimitsConfig, clock: Arc<dyn Clock>) -> AdmissionGate {
        let config = GatekeeperConfig {
            limits,
            ..Default::default()
        };
        AdmissionGate::new(config, Arc::new(MemoryBanStore::new()), clock)
    }

    fn checkout_gate() -> AdmissionGate {
        let mut limits = LimitsConfig::default();
        limits
            .endpoints
            .insert("checkout".to_string(), profile(5, 100, 60_000));
        gate_with(limits)
    }

    fn export_gate() -> AdmissionGate {
        let mut limits = LimitsConfig::default();
        limits
            .endpoints
            .insert("export".to_string(), profile(10, 1, 3_600_000));
        gate_with(limits)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_checkout_is_denied_for_burst() {
        let gate = checkout_gate();

        for _ in 0..5 {
            let verdict = gate
                .admit("client", "checkout", "authenticated", Origin::Caller)
                .await
                .unwrap();
            assert!(verdict.is_allow());
            tokio::time::advance(Duration::from_millis(400)).await;
        }

        let verdict = gate
            .admit("client", "checkout", "authenticated", Origin::Caller)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict::DenyRetryable {
                reason: DenyReason::BurstLimitExceeded,
                retry_after: Duration::from_secs(10),
                severity: Severity::High,
            }
        );
        assert_eq!(gate.penalties().get_delay("client"), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_submit_succeeds_after_retry() {
        let gate = checkout_gate();
        for i in 0..5 {
            assert_eq!(gate.submit("client", "checkout", "authenticated", || async move { i }).await.unwrap(), i);
        }

        let start = Instant::now();
        let result = gate
            .submit("client", "checkout", "authenticated", || async { "late" })
            .await
            .unwrap();

        assert_eq!(result, "late");
        // Burst window plus the progressive delay from the violation
        assert!(start.elapsed() >= Duration::from_secs(11));
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_denied_request_exhausts_retries() {
        let gate = export_gate();
        let runs = AtomicUsize::new(0);
        let counter = &runs;
        let run = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        gate.submit("client", "export", "authenticated", run).await.unwrap();

        let start = Instant::now();
        let err = gate
            .submit("client", "export", "authenticated", run)
            .await
            .unwrap_err();

        match err {
            GatekeeperError::RetriesExhausted {
                attempts,
                reasons,
                retry_after,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(reasons.len(), 5);
                assert!(reasons.iter().all(|r| *r == DenyReason::EndpointLimitExceeded));
                assert_eq!(retry_after, Duration::from_secs(3_600));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() <= gate.scheduler().max_total_wait());
        // Re-submissions do not escalate the penalty again
        assert_eq!(gate.penalties().violations("client").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_identifier_is_rejected_without_running() {
        let gate = checkout_gate();
        gate.ban("client", "manual", Duration::from_secs(60)).await.unwrap();

        let ran = AtomicUsize::new(0);
        let counter = &ran;
        let err = gate
            .submit("client", "checkout", "authenticated", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GatekeeperError::Banned { .. }));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_threshold_blocks_for_fifteen_minutes() {
        let mut limits = LimitsConfig::default();
        limits.global.burst_limit = 1_000;
        limits.global.minute_limit = 1_000;
        limits.roles.authenticated = WindowLimit::per_minute(1_000);
        let gate = gate_with(limits);

        for _ in 0..500 {
            gate.submit("client", "", "authenticated", || async {}).await.unwrap();
        }

        let err = gate
            .submit("client", "", "authenticated", || async {})
            .await
            .unwrap_err();
        match err {
            GatekeeperError::Banned {
                reason, retry_after, ..
            } => {
                assert_eq!(reason, "security_ban");
                assert_eq!(retry_after, Duration::from_secs(900));
            }
            other => panic!("expected a ban, got {:?}", other),
        }

        let log = gate.penalties().violations("client");
        let last = log.last().unwrap();
        assert_eq!(last.reason, "security_ban");
        assert_eq!(last.severity, Severity::Critical);
        assert_eq!(gate.statistics().recent_violations, log.len());

        let err = gate
            .submit("client", "", "authenticated", || async {})
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::Banned { ref reason, .. } if reason == "banned"));
        // Rejections by an existing ban are not violations
        assert_eq!(gate.penalties().violations("client").len(), log.len());

        tokio::time::advance(Duration::from_secs(899)).await;
        assert!(gate.is_banned("client").await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!gate.is_banned("client").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_queued_requests() {
        let gate = Arc::new(export_gate());
        gate.submit("client", "export", "authenticated", || async {}).await.unwrap();

        let queued = tokio::spawn({
            let gate = gate.clone();
            async move {
                gate.submit("client", "export", "authenticated", || async {})
                    .await
            }
        });
        while gate.queue_depth() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(gate.scheduler().pending_identifiers().contains("client"));

        assert_eq!(gate.reset("client").await.unwrap(), 1);
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, GatekeeperError::Canceled { .. }));
        assert_eq!(gate.penalties().get_delay("client"), Duration::ZERO);
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_request_waiting_for_its_turn() {
        let gate = Arc::new(checkout_gate());
        for _ in 0..5 {
            gate.submit("client", "checkout", "authenticated", || async {}).await.unwrap();
        }

        let ran = Arc::new(AtomicUsize::new(0));
        let queued = tokio::spawn({
            let gate = gate.clone();
            let ran = ran.clone();
            async move {
                gate.submit("client", "checkout", "authenticated", move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .await
            }
        });
        while gate.queue_depth() == 0 {
            tokio::task::yield_now().await;
        }

        // Hold the identifier's turn so the re-submission parks inside admission
        let sequencer = gate.sequencer("client");
        let turn = sequencer.lock().await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(gate.reset("client").await.unwrap(), 1);
        drop(turn);

        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, GatekeeperError::Canceled { .. }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_pattern_paths_share_one_budget() {
        let mut limits = LimitsConfig::default();
        limits
            .endpoints
            .insert("/api/orders/*".to_string(), profile(2, 100, 60_000));
        let gate = gate_with(limits);

        for i in 0..2 {
            let verdict = gate
                .admit("client", &format!("/api/orders/{}", i), "authenticated", Origin::Caller)
                .await
                .unwrap();
            assert!(verdict.is_allow());
        }

        let verdict = gate
            .admit("client", "/api/orders/2", "authenticated", Origin::Caller)
            .await
            .unwrap();
        assert_eq!(verdict.reason(), "burst_limit_exceeded");

        // Events are keyed by the pattern, not by each concrete path
        assert_eq!(gate.counter().len(), 2);
        let verdict = gate
            .admit("client", "/api/products/1", "authenticated", Origin::Caller)
            .await
            .unwrap();
        assert!(verdict.is_allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_identifiers_with_queued_retries() {
        let clock = ManualClock::new(50_000_000);
        let mut limits = LimitsConfig::default();
        limits
            .endpoints
            .insert("export".to_string(), profile(10, 1, 3_600_000));
        let gate = Arc::new(gate_with_clock(limits, Arc::new(clock.clone())));

        gate.submit("client", "export", "authenticated", || async {}).await.unwrap();
        gate.submit("other", "", "authenticated", || async {}).await.unwrap();

        let queued = tokio::spawn({
            let gate = gate.clone();
            async move {
                gate.submit("client", "export", "authenticated", || async {})
                    .await
            }
        });
        while gate.queue_depth() == 0 {
            tokio::task::yield_now().await;
        }

        // Well past the cleanup interval and every window
        clock.advance(5 * 3_600_000);
        let report = gate.sweep().await.unwrap();

        assert_eq!(report.windows, 1);
        assert_eq!(report.sequencers, 1);
        assert_eq!(gate.counter().len(), 2);
        assert!(gate.sequencers.contains_key("client"));
        assert!(!gate.sequencers.contains_key("other"));
        assert_eq!(gate.queue_depth(), 1);

        gate.reset("client").await.unwrap();
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, GatekeeperError::Canceled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_delay_holds_execution() {
        let gate = checkout_gate();
        gate.penalties()
            .record_violation("client", "burst_limit_exceeded", Severity::High);

        let start = Instant::now();
        gate.submit("client", "checkout", "authenticated", || async {})
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1_000));

        // Other identifiers are not held
        let start = Instant::now();
        gate.submit("other", "checkout", "authenticated", || async {})
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_in_chunks() {
        let gate = gate_with(LimitsConfig::default());
        let items: Vec<_> = (0..10)
            .map(|i| BatchItem::new("client", "search", "authenticated", move || async move { i }))
            .collect();
        let options = BatchOptions {
            concurrency: 3,
            inter_batch_delay: Duration::from_millis(100),
            retry_failed: true,
        };

        let start = Instant::now();
        let report = gate.submit_batch(items, &options).await;

        assert_eq!(report.chunks, 4);
        assert_eq!(report.succeeded(), 10);
        assert_eq!(report.retried, 0);
        let values: Vec<i32> = report.results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_does_not_retry_banned_items() {
        let gate = gate_with(LimitsConfig::default());
        gate.ban("bad", "manual", Duration::from_secs(60)).await.unwrap();

        let noop = || async {};
        let items = vec![
            BatchItem::new("good", "", "authenticated", noop),
            BatchItem::new("bad", "", "authenticated", noop),
        ];
        let report = gate.submit_batch(items, &BatchOptions::default()).await;

        assert_eq!(report.chunks, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.results[1], Err(GatekeeperError::Banned { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_idle_state() {
        let gate = checkout_gate();
        gate.submit("client", "checkout", "authenticated", || async {})
            .await
            .unwrap();
        gate.ban("banned", "manual", Duration::from_secs(1)).await.unwrap();
        assert_eq!(gate.counter().len(), 2);

        tokio::time::advance(Duration::from_secs(2 * 3_600)).await;
        let report = gate.sweep().await.unwrap();

        assert_eq!(report.windows, 2);
        assert_eq!(report.bans, 1);
        assert_eq!(report.sequencers, 1);
        assert!(gate.counter().is_empty());
        assert_eq!(gate.last_sweep(), Some(report));
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_snapshot() {
        let gate = checkout_gate();
        for _ in 0..3 {
            gate.submit("busy", "checkout", "authenticated", || async {}).await.unwrap();
        }
        gate.submit("quiet", "", "anonymous", || async {}).await.unwrap();
        gate.ban("banned", "manual", Duration::from_secs(60)).await.unwrap();

        let stats = gate.statistics();
        assert_eq!(stats.active_windows, 3);
        assert_eq!(stats.active_bans, 1);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.top_identifiers_by_volume[0].identifier, "busy");
        assert_eq!(stats.top_identifiers_by_volume[0].requests, 3);
    }
}
