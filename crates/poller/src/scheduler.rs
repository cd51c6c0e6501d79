//! Fixed-interval driver for [`PollCycle`].
//!
//! # Startup
//!
//! The scheduler first asks the [`Deliverer`] to confirm readiness. Transient
//! failures are retried (honouring rate-limit hints); a permanent failure
//! (unknown channel, rejected credentials) is returned as
//! [`RelayError::DestinationNotReady`] and nothing is scheduled.
//!
//! # Ticking
//!
//! Ticks fire every [`SchedulerSettings::interval`], the first one
//! immediately. Each tick is awaited before the next is considered, so cycles
//! never overlap. A cycle that overruns the interval restarts the schedule:
//! the ticks it missed are dropped and the next one fires a full interval
//! after it finished.
//!
//! # Shutdown
//!
//! Cancelling the token stops the idle wait at once. An in-flight cycle sees
//! the same token, finishes the delivery it is in, and commits what it sent.

use std::sync::Arc;
use std::time::Duration;

use relay::{ChannelInfo, Deliverer, RelayError, RetryPolicy};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cycle::{CycleOutcome, HaltReason, PollCycle, TickError};

/// Default poll interval (30 minutes).
const DEFAULT_INTERVAL_SECS: u64 = 30 * 60;

/// Default wait between readiness checks (30 seconds).
const DEFAULT_READINESS_RETRY_SECS: u64 = 30;

/// Timing configuration for the [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between the starts of consecutive ticks.
    ///
    /// Default: 30 minutes.
    pub interval: Duration,

    /// Wait between readiness checks after a transient failure, unless the
    /// destination suggests a longer one.
    ///
    /// Default: 30 seconds.
    pub readiness_retry: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            readiness_retry: Duration::from_secs(DEFAULT_READINESS_RETRY_SECS),
        }
    }
}

/// Runs a [`PollCycle`] at a fixed interval once the output channel is ready.
pub struct Scheduler {
    cycle: Arc<PollCycle>,
    deliverer: Arc<dyn Deliverer>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        cycle: Arc<PollCycle>,
        deliverer: Arc<dyn Deliverer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            cycle,
            deliverer,
            settings,
        }
    }

    /// Waits for readiness, then ticks until `cancel` fires.
    ///
    /// Returns `Ok(())` on shutdown. Only a permanent readiness failure is an
    /// error; failed cycles are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RelayError> {
        let Some(channel) = self.wait_until_ready(&cancel).await? else {
            info!("shutdown requested before the output channel was ready");
            return Ok(());
        };
        info!(
            channel_id = %channel.id,
            channel = channel.name.as_deref().unwrap_or("<unnamed>"),
            interval_secs = self.settings.interval.as_secs(),
            organizations = self.cycle.settings().organizations.len(),
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let started = Instant::now();
            report(self.cycle.tick(&cancel).await);
            if started.elapsed() >= self.settings.interval {
                warn!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "poll cycle overran the interval; skipping missed ticks"
                );
                ticker.reset();
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Waits for readiness and runs exactly one tick.
    ///
    /// Returns `Ok(None)` if shutdown was requested before the channel was
    /// ready. A tick that could not load or commit the watermark is an error
    /// here, since there is no later tick to recover it.
    pub async fn run_once(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<CycleOutcome>, RelayError> {
        if self.wait_until_ready(&cancel).await?.is_none() {
            return Ok(None);
        }
        match self.cycle.tick(&cancel).await {
            Ok(outcome) => {
                report(Ok(&outcome));
                Ok(Some(outcome))
            }
            Err(TickError::Load(source) | TickError::Save { source, .. }) => {
                Err(RelayError::State(source))
            }
            Err(TickError::Busy) => Ok(None),
        }
    }

    /// Checks the output channel until it is ready, permanently broken, or
    /// shutdown is requested (`Ok(None)`).
    pub async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelInfo>, RelayError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let error = match self.deliverer.ready().await {
                Ok(channel) => return Ok(Some(channel)),
                Err(error) => error,
            };

            let wait = match error.retry_policy() {
                RetryPolicy::NonRetryable => {
                    error!(%error, "output channel is not usable");
                    return Err(RelayError::DestinationNotReady(error));
                }
                RetryPolicy::Retryable { after } => after
                    .unwrap_or(self.settings.readiness_retry)
                    .max(self.settings.readiness_retry),
            };
            warn!(%error, retry_in_secs = wait.as_secs(), "output channel not ready yet");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Logs the result of one tick.
fn report<O: std::borrow::Borrow<CycleOutcome>>(result: Result<O, TickError>) {
    match result {
        Ok(outcome) => {
            let outcome = outcome.borrow();
            let failed_organizations = outcome.search_failures.len();
            match &outcome.halted {
                None => info!(
                    cycle_id = %outcome.cycle_id,
                    fetched = outcome.fetched,
                    delivered = outcome.delivered,
                    failed_organizations,
                    watermark = %outcome.watermark,
                    "poll cycle finished"
                ),
                Some(halt) => {
                    let reason = match &halt.reason {
                        HaltReason::DeliveryFailed(error) => error.to_string(),
                        HaltReason::ShutdownRequested => "shutdown requested".to_string(),
                    };
                    warn!(
                        cycle_id = %outcome.cycle_id,
                        fetched = outcome.fetched,
                        delivered = outcome.delivered,
                        undelivered = halt.undelivered,
                        failed_organizations,
                        watermark = %outcome.watermark,
                        %reason,
                        "poll cycle stopped early"
                    );
                }
            }
        }
        Err(TickError::Busy) => warn!("previous poll cycle still running; tick skipped"),
        Err(error @ TickError::Load(_)) => error!(%error, "poll cycle skipped"),
        Err(error @ TickError::Save { .. }) => {
            error!(%error, "poll cycle not committed; delivered issues will be relayed again");
        }
    }
}
