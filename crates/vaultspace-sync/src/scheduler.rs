//! Sync scheduler - periodic and on-demand reconciliation cycles
//!
//! ```text
//!   interval tick ──┐
//!                   ├──► SyncScheduler ──► SyncCoordinator::run_cycle
//!   request_sync() ─┘          │
//!                        failure: backoff, then recover() to Idle
//! ```
//!
//! A user-initiated request wakes the loop immediately instead of waiting
//! for the next tick. Requests made while a cycle runs collapse into one
//! follow-up cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultspace_core::retry::RetryPolicy;

use crate::coordinator::SyncCoordinator;

/// Runs sync cycles in the background
pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    /// Time between cycles when nothing is requested
    poll_interval: Duration,
    /// Backoff after failed cycles
    backoff: RetryPolicy,
    /// Set when a cycle should start without waiting for the tick
    sync_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

/// Control handle for a running scheduler
pub struct SchedulerHandle {
    sync_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests an immediate cycle
    pub fn request_sync(&self) {
        info!("Sync requested");
        self.sync_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Whether a requested cycle has not started yet
    pub fn is_sync_requested(&self) -> bool {
        self.sync_requested.load(Ordering::Acquire)
    }

    /// Token that stops the scheduler when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the loop and waits for it to exit
    ///
    /// A cycle in progress is abandoned; its cursor was not persisted, so
    /// the next start replays it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "Sync scheduler task ended abnormally");
        }
    }
}

impl SyncScheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>, poll_interval: Duration, backoff: RetryPolicy) -> Self {
        Self {
            coordinator,
            poll_interval,
            backoff,
            sync_requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an externally owned token, so a parent shutdown stops the loop
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawns the loop on the current runtime
    pub fn spawn(self) -> SchedulerHandle {
        let sync_requested = Arc::clone(&self.sync_requested);
        let wake = Arc::clone(&self.wake);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        SchedulerHandle {
            sync_requested,
            wake,
            cancel,
            task,
        }
    }

    /// Main loop; returns when cancelled
    ///
    /// The first cycle starts immediately.
    pub async fn run(self) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "Sync scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => debug!("Scheduled sync"),
                () = self.wake.notified() => debug!("Requested sync"),
            }
            self.sync_requested.store(false, Ordering::Release);

            let result = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.coordinator.reset_phase();
                    break;
                }
                result = self.coordinator.run_cycle() => result,
            };

            match result {
                Ok(_) => failures = 0,
                Err(err) => {
                    let delay = self.backoff.delay_for(failures, err.retry_hint());
                    failures = failures.saturating_add(1);
                    warn!(
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off after failed sync cycle"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.coordinator.recover();
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}
