//! The poll cycle: one search → merge → deliver → commit pass.
//!
//! # Watermark contract
//!
//! The watermark is passed into [`PollCycle::run`] as a value and returned in
//! the [`CycleOutcome`]; it only moves to the creation time of an issue that
//! was actually delivered. Persistence is a separate, explicit step in
//! [`PollCycle::tick`], taken only when the watermark moved. If that write
//! fails the tick is reported as uncommitted and the next tick starts again
//! from whatever the store holds, so nothing diverges from durable state.
//!
//! # Failure isolation
//!
//! - A failed search drops that organization for this tick only.
//! - A failed delivery ends the tick's deliveries; everything before it stays
//!   delivered and committed, everything after it is fetched again next tick.
//! - A shutdown request is honoured between deliveries, never during one.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use relay::{
    format_notification, CycleId, Deliverer, DeliveryError, IssueRecord, IssueSearchClient,
    OrganizationName, PollBatch, SearchError, StateError, StateStore, Timestamp, Watermark,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default first-run lookback window (10 minutes).
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(10 * 60);

/// What one cycle searches for.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Organizations to search, in configuration order.
    pub organizations: Vec<OrganizationName>,

    /// How far back a first run (unset watermark) looks.
    ///
    /// Default: 10 minutes.
    pub lookback: Duration,
}

impl CycleSettings {
    /// Creates settings for `organizations` with the default lookback.
    pub fn new(organizations: Vec<OrganizationName>) -> Self {
        Self {
            organizations,
            lookback: DEFAULT_LOOKBACK,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// An organization whose search failed this tick.
#[derive(Debug)]
pub struct OrganizationFailure {
    pub organization: OrganizationName,
    pub error: SearchError,
}

/// Why deliveries stopped before the end of the batch.
#[derive(Debug)]
pub enum HaltReason {
    /// The output channel returned an error.
    DeliveryFailed(DeliveryError),
    /// Shutdown was requested between two deliveries.
    ShutdownRequested,
}

/// Deliveries stopped partway through the batch.
#[derive(Debug)]
pub struct DeliveryHalt {
    /// Issues left undelivered; they are fetched again next tick.
    pub undelivered: usize,
    pub reason: HaltReason,
}

/// Result of one cycle, before persistence.
#[derive(Debug)]
pub struct CycleOutcome {
    pub cycle_id: CycleId,

    /// Watermark the cycle started from (as loaded).
    pub previous: Watermark,

    /// Watermark after the cycle. Equal to `previous` when nothing was
    /// delivered and the stored watermark was already set.
    pub watermark: Watermark,

    /// Issues in the merged batch.
    pub fetched: usize,

    /// Issues successfully handed to the output channel, in order.
    pub delivered: usize,

    pub search_failures: Vec<OrganizationFailure>,

    /// Set when deliveries stopped before the end of the batch.
    pub halted: Option<DeliveryHalt>,
}

impl CycleOutcome {
    /// Returns `true` if the watermark needs to be written.
    pub fn advanced(&self) -> bool {
        self.watermark != self.previous
    }
}

/// A tick that did not complete its commit.
#[derive(Debug, Error)]
pub enum TickError {
    /// Another tick is still running on this cycle.
    #[error("a poll cycle is already in progress")]
    Busy,

    /// The watermark could not be read; nothing was searched or delivered.
    #[error("could not load watermark: {0}")]
    Load(#[source] StateError),

    /// Deliveries happened but the new watermark could not be written. The
    /// delivered issues will be relayed again next tick.
    #[error("could not persist watermark {}: {source}", .outcome.watermark)]
    Save {
        outcome: CycleOutcome,
        #[source]
        source: StateError,
    },
}

// ---------------------------------------------------------------------------
// PollCycle
// ---------------------------------------------------------------------------

/// Orchestrates one poll tick against the three ports.
///
/// Ticks on one `PollCycle` never overlap: a tick started while another is in
/// progress returns [`TickError::Busy`] without touching the watermark.
pub struct PollCycle {
    search: Arc<dyn IssueSearchClient>,
    deliverer: Arc<dyn Deliverer>,
    store: Arc<dyn StateStore>,
    settings: CycleSettings,
    in_flight: Mutex<()>,
}

impl PollCycle {
    pub fn new(
        search: Arc<dyn IssueSearchClient>,
        deliverer: Arc<dyn Deliverer>,
        store: Arc<dyn StateStore>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            search,
            deliverer,
            store,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Runs a full tick at the current wall-clock time.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<CycleOutcome, TickError> {
        self.tick_at(Timestamp::now(), cancel).await
    }

    /// Runs a full tick: load, [`run`](Self::run), and save if the watermark moved.
    pub async fn tick_at(
        &self,
        now: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, TickError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Err(TickError::Busy);
        };

        let cycle_id = CycleId::new_random();
        let span = info_span!("poll_cycle", %cycle_id);

        async move {
            let watermark = self.store.load().await.map_err(TickError::Load)?;
            let outcome = self.run(cycle_id, watermark, now, cancel).await;

            if outcome.advanced() {
                if let Err(source) = self.store.save(outcome.watermark).await {
                    return Err(TickError::Save { outcome, source });
                }
                info!(watermark = %outcome.watermark, "watermark committed");
            }

            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Searches, orders and delivers starting from `watermark`.
    ///
    /// Performs no persistence; the returned [`CycleOutcome::watermark`] is
    /// the value the caller should commit.
    pub async fn run(
        &self,
        cycle_id: CycleId,
        watermark: Watermark,
        now: Timestamp,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let since = watermark.search_lower_bound(now, self.settings.lookback);
        if watermark.is_unset() {
            info!(%since, "no stored watermark; searching lookback window");
        }
        // The search bound becomes the baseline so that a first run with no
        // results still records where the next run should start.
        let baseline = Watermark::at(since);

        let (records, search_failures) = self.collect(since).await;
        let batch = PollBatch::assemble(records, baseline);
        let fetched = batch.len();

        if batch.is_empty() {
            debug!("no new issues");
            return CycleOutcome {
                cycle_id,
                previous: watermark,
                watermark: baseline,
                fetched,
                delivered: 0,
                search_failures,
                halted: None,
            };
        }

        info!(count = fetched, "delivering new issues");
        let (watermark_after, delivered, halted) = self.deliver(batch, baseline, cancel).await;

        CycleOutcome {
            cycle_id,
            previous: watermark,
            watermark: watermark_after,
            fetched,
            delivered,
            search_failures,
            halted,
        }
    }

    /// Searches every organization concurrently and splits successes from failures.
    ///
    /// If any search was truncated, records newer than the earliest
    /// truncation point are held back for a later cycle so the watermark
    /// cannot pass issues the truncated search never returned.
    async fn collect(&self, since: Timestamp) -> (Vec<IssueRecord>, Vec<OrganizationFailure>) {
        let searches = self.settings.organizations.iter().map(|organization| async move {
            let result = self.search.search(organization, since).await;
            (organization, result)
        });

        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut horizon: Option<Timestamp> = None;
        for (organization, result) in join_all(searches).await {
            match result {
                Ok(found) => {
                    debug!(
                        %organization,
                        count = found.records.len(),
                        truncated = found.is_truncated(),
                        "search completed"
                    );
                    horizon = match (horizon, found.complete_through) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    records.extend(found.records);
                }
                Err(error) => {
                    if error.is_transient() {
                        warn!(%organization, %error, "search failed; skipping organization this cycle");
                    } else {
                        error!(%organization, %error, "search rejected; skipping organization this cycle");
                    }
                    failures.push(OrganizationFailure {
                        organization: organization.clone(),
                        error,
                    });
                }
            }
        }

        if let Some(through) = horizon {
            let before = records.len();
            records.retain(|record| record.created_at() <= through);
            info!(
                %through,
                held_back = before - records.len(),
                "a search was truncated; newer issues wait for a later cycle"
            );
        }
        (records, failures)
    }

    /// Delivers `batch` in order, advancing the watermark after each success.
    ///
    /// On a halt the returned watermark stays strictly below the first
    /// undelivered issue, so issues sharing its creation time are searched
    /// again (and the delivered ones among them are sent twice).
    async fn deliver(
        &self,
        batch: PollBatch,
        baseline: Watermark,
        cancel: &CancellationToken,
    ) -> (Watermark, usize, Option<DeliveryHalt>) {
        let total = batch.len();
        let mut watermark = baseline;
        let mut delivered = 0;

        for issue in &batch {
            let reason = if cancel.is_cancelled() {
                info!(delivered, remaining = total - delivered, "shutdown requested; stopping deliveries");
                HaltReason::ShutdownRequested
            } else {
                let notification = format_notification(issue);
                match self.deliverer.send(&notification).await {
                    Ok(()) => {
                        watermark = watermark.advance(issue.created_at());
                        delivered += 1;
                        debug!(
                            organization = %issue.organization(),
                            repository = %issue.repository(),
                            url = issue.url(),
                            "issue delivered"
                        );
                        continue;
                    }
                    Err(error) => {
                        if error.is_transient() {
                            warn!(%error, delivered, url = issue.url(), "delivery failed; remaining issues deferred to next cycle");
                        } else {
                            error!(%error, delivered, url = issue.url(), "destination rejected delivery; remaining issues deferred to next cycle");
                        }
                        HaltReason::DeliveryFailed(error)
                    }
                }
            };

            let committed = watermark_before(&batch, baseline, delivered, issue.created_at());
            if committed != watermark {
                debug!(
                    stopped_at = %issue.created_at(),
                    "undelivered issue shares a delivered timestamp; holding watermark below it"
                );
            }
            let halt = DeliveryHalt {
                undelivered: total - delivered,
                reason,
            };
            return (committed, delivered, Some(halt));
        }

        (watermark, delivered, None)
    }
}

/// Newest timestamp among the first `delivered` issues that is strictly
/// earlier than `stopped_at`, or `baseline` if there is none.
fn watermark_before(
    batch: &PollBatch,
    baseline: Watermark,
    delivered: usize,
    stopped_at: Timestamp,
) -> Watermark {
    batch
        .iter()
        .take(delivered)
        .map(IssueRecord::created_at)
        .filter(|created| *created < stopped_at)
        .fold(baseline, Watermark::advance)
}
