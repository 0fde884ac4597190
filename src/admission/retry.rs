//! Retry scheduling for denied requests and chunked batch submission.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gate::{AdmissionGate, Origin};
use super::verdict::{DenyReason, Verdict};
use crate::config::RetryConfig;
use crate::error::{GatekeeperError, Result};

/// A denied request waiting for its next admission attempt.
pub struct QueuedRequest<F> {
    pub ticket: Uuid,
    pub identifier: String,
    pub endpoint: String,
    pub role: String,
    /// Verdict of the most recent attempt
    pub last_verdict: Verdict,
    /// Re-submissions made so far
    pub attempts: u32,
    pub queued_at_ms: u64,
    operation: F,
}

impl<F> QueuedRequest<F> {
    pub fn new(
        identifier: &str,
        endpoint: &str,
        role: &str,
        operation: F,
        last_verdict: Verdict,
        queued_at_ms: u64,
    ) -> Self {
        Self {
            ticket: Uuid::new_v4(),
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            role: role.to_string(),
            last_verdict,
            attempts: 0,
            queued_at_ms,
            operation,
        }
    }
}

/// Removes a ticket from the pending registry when the request settles.
struct Registration<'a> {
    scheduler: &'a RetryScheduler,
    identifier: String,
    ticket: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.scheduler.deregister(&self.identifier, self.ticket);
    }
}

/// Re-submits denied requests with bounded exponential backoff.
///
/// The first wait is the evaluator's own `retry_after`. Each later wait is
/// `base_delays[attempt - 1] * max(retry_after_secs, 1)`, capped at the
/// configured maximum, so an always-denied request settles after at most
/// `max_attempts` re-submissions.
pub struct RetryScheduler {
    policy: RetryConfig,
    pending: DashMap<String, HashMap<Uuid, oneshot::Sender<()>>>,
}

impl RetryScheduler {
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            pending: DashMap::new(),
        }
    }

    fn cap(&self) -> Duration {
        Duration::from_millis(self.policy.max_delay_ms)
    }

    /// Wait before the first re-submission.
    pub fn initial_delay(&self, retry_after: Duration) -> Duration {
        if retry_after.is_zero() {
            return self.backoff_delay(1, retry_after);
        }
        retry_after.min(self.cap())
    }

    /// Wait after `attempt` re-submissions were denied.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Duration) -> Duration {
        let delays = &self.policy.base_delays_ms;
        let index = (attempt.saturating_sub(1) as usize).min(delays.len().saturating_sub(1));
        let base = delays.get(index).copied().unwrap_or(self.policy.max_delay_ms);
        let factor = (retry_after.as_millis() as u64 / 1_000).max(1);

        Duration::from_millis(base.saturating_mul(factor)).min(self.cap())
    }

    /// Upper bound on the time a request can spend queued.
    pub fn max_total_wait(&self) -> Duration {
        self.cap() * self.policy.max_attempts
    }

    /// Number of requests currently queued.
    pub fn queue_depth(&self) -> usize {
        self.pending.iter().map(|tickets| tickets.len()).sum()
    }

    /// Identifiers that have at least one queued request.
    pub fn pending_identifiers(&self) -> HashSet<String> {
        self.pending.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Resolve every queued request of `identifier` as canceled.
    ///
    /// Returns how many requests were canceled.
    pub fn cancel(&self, identifier: &str) -> usize {
        let Some((_, tickets)) = self.pending.remove(identifier) else {
            return 0;
        };

        let canceled = tickets.len();
        for (_, cancel) in tickets {
            let _ = cancel.send(());
        }

        info!(identifier = %identifier, canceled, "Canceled queued requests");
        canceled
    }

    fn register(&self, identifier: &str, ticket: Uuid) -> (Registration<'_>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        self.pending
            .entry(identifier.to_string())
            .or_default()
            .insert(ticket, tx);

        let registration = Registration {
            scheduler: self,
            identifier: identifier.to_string(),
            ticket,
        };
        (registration, rx)
    }

    fn deregister(&self, identifier: &str, ticket: Uuid) {
        if let Some(mut tickets) = self.pending.get_mut(identifier) {
            tickets.remove(&ticket);
        }
        self.pending.remove_if(identifier, |_, tickets| tickets.is_empty());
    }

    /// Drive a queued request until it is admitted, banned, exhausted or
    /// canceled.
    pub(crate) async fn run<F, Fut, T>(&self, gate: &AdmissionGate, mut item: QueuedRequest<F>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (registration, mut canceled) = self.register(&item.identifier, item.ticket);

        let mut reasons: Vec<DenyReason> = Vec::new();
        if let Verdict::DenyRetryable { reason, .. } = &item.last_verdict {
            reasons.push(*reason);
        }
        let mut retry_after = item.last_verdict.retry_after().unwrap_or_default();
        let mut delay = self.initial_delay(retry_after);

        debug!(
            identifier = %item.identifier,
            ticket = %item.ticket,
            delay_ms = delay.as_millis() as u64,
            "Queued request for retry"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut canceled => {
                    return Err(GatekeeperError::Canceled {
                        identifier: item.identifier,
                    });
                }
            }

            item.attempts += 1;
            let verdict = gate
                .admit(&item.identifier, &item.endpoint, &item.role, Origin::Retry)
                .await?;

            match verdict {
                Verdict::Allow { .. } => {
                    // A reset may land while the re-submission waits its turn
                    if !matches!(canceled.try_recv(), Err(TryRecvError::Empty)) {
                        return Err(GatekeeperError::Canceled {
                            identifier: item.identifier,
                        });
                    }
                    drop(registration);
                    info!(
                        identifier = %item.identifier,
                        attempts = item.attempts,
                        waited_ms = gate.now_ms().saturating_sub(item.queued_at_ms),
                        "Queued request admitted"
                    );
                    return Ok(gate.execute(&item.identifier, item.operation).await);
                }
                Verdict::DenyBanned {
                    cause,
                    retry_after,
                    expires_at_ms,
                } => {
                    warn!(
                        identifier = %item.identifier,
                        attempts = item.attempts,
                        "Queued request hit a ban"
                    );
                    return Err(GatekeeperError::Banned {
                        identifier: item.identifier,
                        reason: cause.to_string(),
                        retry_after,
                        expires_at_ms,
                    });
                }
                Verdict::DenyRetryable {
                    reason,
                    retry_after: hint,
                    ..
                } => {
                    reasons.push(reason);
                    retry_after = hint;
                    item.last_verdict = verdict;

                    if item.attempts >= self.policy.max_attempts {
                        warn!(
                            identifier = %item.identifier,
                            attempts = item.attempts,
                            reasons = ?reasons,
                            waited_ms = gate.now_ms().saturating_sub(item.queued_at_ms),
                            "Retries exhausted"
                        );
                        return Err(GatekeeperError::RetriesExhausted {
                            identifier: item.identifier,
                            attempts: item.attempts,
                            reasons,
                            retry_after,
                        });
                    }

                    delay = self.backoff_delay(item.attempts, hint);
                    debug!(
                        identifier = %item.identifier,
                        attempts = item.attempts,
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "Retry denied, backing off"
                    );
                }
            }
        }
    }
}

/// One operation of a batch.
///
/// Batch operations are `Fn` so the final pass can run a failed item again.
pub struct BatchItem<F> {
    pub identifier: String,
    pub endpoint: String,
    pub role: String,
    pub operation: F,
}

impl<F> BatchItem<F> {
    pub fn new(
        identifier: impl Into<String>,
        endpoint: impl Into<String>,
        role: impl Into<String>,
        operation: F,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            endpoint: endpoint.into(),
            role: role.into(),
            operation,
        }
    }
}

/// How a batch is chunked and paced.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items submitted concurrently per chunk
    pub concurrency: usize,
    /// Pause between two chunks
    pub inter_batch_delay: Duration,
    /// Run failed items once more after the last chunk
    pub retry_failed: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            inter_batch_delay: Duration::from_millis(100),
            retry_failed: true,
        }
    }
}

/// Outcome of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<Result<T>>,
    /// Chunks submitted, including the retry pass
    pub chunks: usize,
    /// Items that went through the retry pass
    pub retried: usize,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Whether the final batch pass should run an item again.
fn worth_retrying(error: &GatekeeperError) -> bool {
    !matches!(
        error,
        GatekeeperError::Banned { .. } | GatekeeperError::Canceled { .. }
    )
}

pub(crate) async fn run_batch<F, Fut, T>(
    gate: &AdmissionGate,
    items: Vec<BatchItem<F>>,
    options: &BatchOptions,
) -> BatchReport<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
{
    let concurrency = options.concurrency.max(1);
    let mut results: Vec<Result<T>> = Vec::with_capacity(items.len());
    let mut chunks = 0;

    for chunk in items.chunks(concurrency) {
        if chunks > 0 && !options.inter_batch_delay.is_zero() {
            tokio::time::sleep(options.inter_batch_delay).await;
        }
        chunks += 1;

        let settled = join_all(chunk.iter().map(|item| {
            gate.submit(&item.identifier, &item.endpoint, &item.role, || (item.operation)())
        }))
        .await;
        results.extend(settled);
    }

    let mut retried = 0;
    if options.retry_failed {
        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| match result {
                Err(e) if worth_retrying(e) => Some(index),
                _ => None,
            })
            .collect();

        for indices in failed.chunks(concurrency) {
            if chunks > 0 && !options.inter_batch_delay.is_zero() {
                tokio::time::sleep(options.inter_batch_delay).await;
            }
            chunks += 1;

            let settled = join_all(indices.iter().map(|&index| {
                let item = &items[index];
                gate.submit(&item.identifier, &item.endpoint, &item.role, || (item.operation)())
            }))
            .await;
            for (&index, result) in indices.iter().zip(settled) {
                results[index] = result;
            }
            retried += indices.len();
        }

        if retried > 0 {
            info!(retried, "Retried failed batch items");
        }
    }

    BatchReport {
        results,
        chunks,
        retried,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> RetryScheduler {
        RetryScheduler::new(RetryConfig::default())
    }

    #[test]
    fn test_backoff_is_seeded_by_retry_after() {
        let scheduler = scheduler();

        assert_eq!(scheduler.backoff_delay(1, Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(scheduler.backoff_delay(2, Duration::from_secs(10)), Duration::from_secs(20));
        assert_eq!(scheduler.backoff_delay(3, Duration::from_secs(10)), Duration::from_secs(40));
        // Sub-second hints use a factor of one
        assert_eq!(scheduler.backoff_delay(2, Duration::from_millis(300)), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let scheduler = scheduler();
        assert_eq!(scheduler.backoff_delay(4, Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(scheduler.backoff_delay(50, Duration::from_secs(3_600)), Duration::from_secs(60));
        assert_eq!(scheduler.max_total_wait(), Duration::from_secs(240));
    }

    #[test]
    fn test_initial_delay() {
        let scheduler = scheduler();
        assert_eq!(scheduler.initial_delay(Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(scheduler.initial_delay(Duration::from_secs(3_600)), Duration::from_secs(60));
        assert_eq!(scheduler.initial_delay(Duration::ZERO), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_registry_tracks_and_cancels() {
        let scheduler = scheduler();
        let (first, mut first_rx) = scheduler.register("client", Uuid::new_v4());
        let (_second, mut second_rx) = scheduler.register("client", Uuid::new_v4());
        let (_other, _) = scheduler.register("other", Uuid::new_v4());

        assert_eq!(scheduler.queue_depth(), 3);
        assert_eq!(scheduler.pending_identifiers().len(), 2);

        drop(first);
        assert_eq!(scheduler.queue_depth(), 2);
        assert!(first_rx.try_recv().is_err());

        assert_eq!(scheduler.cancel("client"), 1);
        assert!(second_rx.try_recv().is_ok());
        assert_eq!(scheduler.queue_depth(), 1);
        assert_eq!(scheduler.cancel("client"), 0);
    }

    #[test]
    fn test_worth_retrying() {
        assert!(!worth_retrying(&GatekeeperError::Canceled {
            identifier: "client".to_string()
        }));
        assert!(worth_retrying(&GatekeeperError::RetriesExhausted {
            identifier: "client".to_string(),
            attempts: 4,
            reasons: vec![],
            retry_after: Duration::ZERO,
        }));
    }
}
