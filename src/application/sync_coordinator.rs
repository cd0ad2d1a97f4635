//! Reconciliation of the pending queue and the cache with the server.
//!
//! State machine: `Idle -> Syncing -> (Idle | Failed)`. The `Syncing` phase
//! is the lock: a request arriving while it is held is a no-op. A cycle is
//! all-or-nothing with respect to the queue; on failure nothing is removed
//! and the next trigger replays the whole snapshot from the start.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::domain::{
    AppError, Connectivity, EntityKind, Mutation, Result, SkipReason, SyncConfig, SyncMeta,
    SyncOutcome, SyncPhase, SyncStatus, SyncTrigger,
};
use crate::infrastructure::{DurableStore, Reachability, RemoteBackend};

use super::connectivity::ConnectivityMonitor;
use super::domain_cache::DomainCache;
use super::pending_queue::PendingQueue;

#[derive(Debug, Default)]
struct CoordinatorState {
    phase: SyncPhase,
    meta: SyncMeta,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    fn retry_after(&self, config: &SyncConfig) -> Option<DateTime<Utc>> {
        let failed_at = self.last_failure_at?;
        let delay = chrono::Duration::from_std(config.backoff_delay(self.consecutive_failures))
            .unwrap_or_else(|_| chrono::Duration::days(365));
        failed_at.checked_add_signed(delay)
    }
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ownership of the `Syncing` phase for one request.
///
/// Dropped without being settled (the request's future was cancelled
/// mid-cycle), it leaves the phase `Failed` so later triggers still run.
struct SyncClaim<'a> {
    state: &'a Mutex<CoordinatorState>,
    settled: bool,
}

impl SyncClaim<'_> {
    /// Leave the `Syncing` phase through `f`.
    fn settle<R>(mut self, f: impl FnOnce(&mut CoordinatorState) -> R) -> R {
        self.settled = true;
        f(&mut lock(self.state))
    }
}

impl Drop for SyncClaim<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(self.state);
        state.phase = SyncPhase::Failed;
        state.meta = std::mem::take(&mut state.meta).with_error("sync cancelled before completion");
        tracing::warn!("Sync cancelled mid-cycle, pending operations kept");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    /// Replay the queue, then refresh every entity.
    Full,
    /// Refresh every entity only.
    RefreshOnly,
}

/// Drives sync cycles against the remote backend.
pub struct SyncCoordinator {
    cache: Arc<DomainCache>,
    remote: Arc<dyn RemoteBackend>,
    reachability: Arc<dyn Reachability>,
    config: SyncConfig,
    state: Mutex<CoordinatorState>,
}

impl SyncCoordinator {
    /// Create a coordinator, restoring the last sync time and error from the store.
    ///
    /// # Errors
    /// Returns a storage error if the sync bookkeeping cannot be read.
    pub async fn restore(
        cache: Arc<DomainCache>,
        remote: Arc<dyn RemoteBackend>,
        reachability: Arc<dyn Reachability>,
        config: SyncConfig,
    ) -> Result<Self> {
        let meta = cache.store().load_sync_meta().await?;
        Ok(Self {
            cache,
            remote,
            reachability,
            config,
            state: Mutex::new(CoordinatorState {
                meta,
                ..CoordinatorState::default()
            }),
        })
    }

    fn queue(&self) -> &PendingQueue {
        self.cache.queue()
    }

    fn monitor(&self) -> &ConnectivityMonitor {
        self.cache.monitor()
    }

    fn store(&self) -> &dyn DurableStore {
        self.cache.store().as_ref()
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        lock(&self.state)
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.lock_state().phase
    }

    /// Status for the presentation layer.
    pub async fn status(&self) -> SyncStatus {
        let pending_count = self.queue().len().await;
        let state = self.lock_state();
        SyncStatus {
            phase: state.phase,
            connectivity: Some(self.monitor().current_status()),
            pending_count,
            last_sync: state.meta.last_sync,
            last_error: state.meta.last_error.clone(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Replay pending operations and refresh the cache.
    ///
    /// Manual triggers re-probe reachability rather than trusting the
    /// monitor, and ignore backoff.
    ///
    /// # Errors
    /// Returns the sync, timeout or storage error that failed the cycle; the
    /// queue is left intact and the phase becomes `Failed`.
    pub async fn request_sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        self.run(trigger, Cycle::Full).await
    }

    /// Pull fresh server state for every cached entity without touching the queue.
    ///
    /// # Errors
    /// Returns the error that failed the refresh.
    pub async fn refresh(&self) -> Result<SyncOutcome> {
        self.run(SyncTrigger::Manual, Cycle::RefreshOnly).await
    }

    /// Send a user change made while online: queue it behind any earlier
    /// operations, then sync.
    ///
    /// # Errors
    /// Returns a storage error if queueing fails, or the error that failed the sync.
    pub async fn submit_now(&self, mutation: Mutation) -> Result<SyncOutcome> {
        let op = self.queue().enqueue(mutation).await?;
        tracing::debug!(seq = op.seq, "Submitting change");
        self.request_sync(SyncTrigger::Manual).await
    }

    /// Watch connectivity and sync on every offline-to-online edge while
    /// operations are pending.
    pub fn spawn_auto_sync(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.monitor().subscribe();

        tokio::spawn(async move {
            let mut previous = *rx.borrow_and_update();

            while rx.changed().await.is_ok() {
                let current = *rx.borrow_and_update();
                let reconnected =
                    previous == Connectivity::Offline && current == Connectivity::Online;
                previous = current;

                if !reconnected || self.queue().is_empty().await {
                    continue;
                }

                match self.request_sync(SyncTrigger::Reconnect).await {
                    Ok(outcome) => tracing::debug!(?outcome, "Reconnect sync finished"),
                    Err(e) => tracing::warn!(error = %e, "Reconnect sync failed"),
                }
            }
        })
    }

    async fn run(&self, trigger: SyncTrigger, cycle: Cycle) -> Result<SyncOutcome> {
        // Claim the Syncing phase before the first suspension point.
        let (claim, previous) = {
            let mut state = self.lock_state();
            if state.phase == SyncPhase::Syncing {
                tracing::debug!(?trigger, "Sync already in progress, ignoring request");
                return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
            }
            if trigger == SyncTrigger::Reconnect {
                if let Some(retry_after) = state.retry_after(&self.config) {
                    if Utc::now() < retry_after {
                        tracing::debug!(%retry_after, "Backing off after failed sync");
                        return Ok(SyncOutcome::Skipped(SkipReason::BackingOff { retry_after }));
                    }
                }
            }
            let previous = std::mem::replace(&mut state.phase, SyncPhase::Syncing);
            let claim = SyncClaim {
                state: &self.state,
                settled: false,
            };
            (claim, previous)
        };

        if let Some(reason) = self.preflight(trigger, cycle).await {
            claim.settle(|state| state.phase = previous);
            tracing::debug!(?trigger, %reason, "Sync skipped");
            return Ok(SyncOutcome::Skipped(reason));
        }

        let started = std::time::Instant::now();
        let result = self.run_cycle(cycle).await;
        self.finish(claim, &result).await;

        match result {
            Ok((submitted, refreshed)) => {
                tracing::info!(
                    ?trigger,
                    submitted,
                    refreshed,
                    duration_ms = started.elapsed().as_millis(),
                    "Sync completed"
                );
                Ok(SyncOutcome::Completed {
                    submitted,
                    refreshed,
                })
            }
            Err(e) => {
                tracing::warn!(?trigger, error = %e, "Sync failed, pending operations kept");
                Err(e)
            }
        }
    }

    async fn preflight(&self, trigger: SyncTrigger, cycle: Cycle) -> Option<SkipReason> {
        let connectivity = match trigger {
            SyncTrigger::Manual => {
                let probed = self.reachability.probe().await;
                self.monitor().report(probed);
                probed
            }
            SyncTrigger::Reconnect => self.monitor().current_status(),
        };

        if !connectivity.is_online() {
            return Some(SkipReason::Offline);
        }
        if cycle == Cycle::Full && self.queue().is_empty().await {
            return Some(SkipReason::NothingPending);
        }
        None
    }

    async fn run_cycle(&self, cycle: Cycle) -> Result<(usize, usize)> {
        let mut submitted = 0;

        if cycle == Cycle::Full {
            let snapshot = self.queue().drain().await;
            tracing::info!(pending = snapshot.len(), "Replaying pending operations");

            for op in &snapshot {
                let label = format!("submit {} #{}", op.mutation.label(), op.seq);
                self.bounded(label, self.remote.submit(op)).await?;
                tracing::debug!(seq = op.seq, "Operation accepted");
            }

            // Only the replayed snapshot is removed; later enqueues wait for the next cycle.
            if let Some(last) = snapshot.last() {
                self.queue().acknowledge(last.seq).await?;
            }
            submitted = snapshot.len();
        }

        let mut refreshed = 0;
        for kind in EntityKind::CACHED {
            let snapshot = self.bounded(format!("pull {kind}"), self.remote.pull(kind)).await?;
            self.cache.apply_snapshot(snapshot).await?;
            refreshed += 1;
        }

        Ok((submitted, refreshed))
    }

    /// Run a remote call under the configured timeout.
    async fn bounded<T, F>(&self, operation: String, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let after = self.config.request_timeout();
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| AppError::Timeout { operation, after })?
    }

    async fn finish(&self, claim: SyncClaim<'_>, result: &Result<(usize, usize)>) {
        let meta = claim.settle(|state| {
            match result {
                Ok(_) => {
                    state.phase = SyncPhase::Idle;
                    state.consecutive_failures = 0;
                    state.last_failure_at = None;
                    state.meta = std::mem::take(&mut state.meta).with_sync_time();
                }
                Err(e) => {
                    state.phase = SyncPhase::Failed;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.last_failure_at = Some(Utc::now());
                    state.meta = std::mem::take(&mut state.meta).with_error(e.to_string());
                }
            }
            state.meta.clone()
        });

        if let Err(e) = self.store().save_sync_meta(&meta).await {
            tracing::warn!(error = %e, "Failed to persist sync status");
        }
    }
}
