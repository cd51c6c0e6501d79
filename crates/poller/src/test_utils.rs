//! In-memory fakes of the three ports for cycle and scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay::{
    ChannelId, ChannelInfo, Deliverer, DeliveryError, IssueRecord, IssueSearchClient,
    Notification, OrganizationName, RepositoryName, SearchError, SearchResults, StateError,
    StateStore, Timestamp, Watermark,
};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

// ─── Builders ───

pub fn ts(value: &str) -> Timestamp {
    Timestamp::parse_rfc3339(value).unwrap()
}

pub fn issue(org: &str, repo: &str, title: &str, created: &str) -> IssueRecord {
    IssueRecord::new(
        OrganizationName::new(org).unwrap(),
        RepositoryName::new(repo).unwrap(),
        title,
        format!("https://github.com/{org}/{repo}/issues/{}", title.replace(' ', "-")),
        ts(created),
    )
}

// ─── Search ───

/// Serves a fixed set of issues, filtered by organization and `created_after`,
/// newest first so callers cannot rely on remote ordering.
#[derive(Default)]
pub struct ScriptedSearch {
    issues: Mutex<Vec<IssueRecord>>,
    failures: Mutex<HashMap<OrganizationName, VecDeque<SearchError>>>,
    truncations: Mutex<HashMap<OrganizationName, Timestamp>>,
    calls: Mutex<Vec<(OrganizationName, Timestamp)>>,
    unfiltered: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
    delay: Mutex<Option<Duration>>,
    delays: Mutex<HashMap<OrganizationName, Duration>>,
    active: AtomicUsize,
    completed: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedSearch {
    pub fn add(&self, issue: IssueRecord) {
        self.issues.lock().unwrap().push(issue);
    }

    /// Makes the next search of `org` fail with `error`.
    pub fn fail_next(&self, org: &OrganizationName, error: SearchError) {
        self.failures
            .lock()
            .unwrap()
            .entry(org.clone())
            .or_default()
            .push_back(error);
    }

    /// Makes the next search of `org` stop after issues created at `through`,
    /// as a capped result set would.
    pub fn truncate_next(&self, org: &OrganizationName, through: Timestamp) {
        self.truncations.lock().unwrap().insert(org.clone(), through);
    }

    /// Returns every issue of the organization, ignoring `created_after`.
    pub fn return_unfiltered(&self) {
        self.unfiltered.store(true, Ordering::SeqCst);
    }

    /// Blocks searches until a permit is added to the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes every search take `delay` (in tokio time).
    pub fn delay_each(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes searches of `org` take `delay`, overriding [`Self::delay_each`].
    pub fn delay_for(&self, org: &OrganizationName, delay: Duration) {
        self.delays.lock().unwrap().insert(org.clone(), delay);
    }

    /// Number of searches that have returned.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of searches observed running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<(OrganizationName, Timestamp)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueSearchClient for ScriptedSearch {
    async fn search(
        &self,
        organization: &OrganizationName,
        created_after: Timestamp,
    ) -> Result<SearchResults, SearchError> {
        self.calls
            .lock()
            .unwrap()
            .push((organization.clone(), created_after));
        self.entered.notify_one();

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(organization)
            .copied()
            .or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(organization)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let unfiltered = self.unfiltered.load(Ordering::SeqCst);
        let mut found: Vec<IssueRecord> = self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.organization() == organization)
            .filter(|i| unfiltered || i.created_at() > created_after)
            .cloned()
            .collect();
        found.sort();
        found.reverse();

        let truncation = self.truncations.lock().unwrap().remove(organization);
        Ok(match truncation {
            Some(through) => {
                found.retain(|i| i.created_at() <= through);
                SearchResults::truncated(found, through)
            }
            None => SearchResults::complete(found),
        })
    }
}

// ─── Delivery ───

/// Records every notification; individual attempts can be scripted to fail.
#[derive(Default)]
pub struct RecordingDeliverer {
    sent: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failures: Mutex<HashMap<usize, DeliveryError>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    ready_results: Mutex<VecDeque<Result<ChannelInfo, DeliveryError>>>,
    ready_calls: AtomicUsize,
    gauge: Mutex<Option<Gauge>>,
    gauge_readings: Mutex<Vec<usize>>,
}

type Gauge = Arc<dyn Fn() -> usize + Send + Sync>;

impl RecordingDeliverer {
    /// Makes the `attempt`-th send (1-based, over the fake's lifetime) fail.
    pub fn fail_attempt(&self, attempt: usize, error: DeliveryError) {
        self.failures.lock().unwrap().insert(attempt, error);
    }

    /// Cancels `token` right after the first successful send.
    pub fn cancel_after_first(&self, token: CancellationToken) {
        self.cancel_after(1, token);
    }

    /// Cancels `token` right after the `sends`-th successful send.
    pub fn cancel_after(&self, sends: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((sends, token));
    }

    /// Queues a readiness result; once the queue is empty `ready` succeeds.
    pub fn push_ready(&self, result: Result<ChannelInfo, DeliveryError>) {
        self.ready_results.lock().unwrap().push_back(result);
    }

    /// Reads `gauge` at the start of every send; see [`Self::gauge_readings`].
    pub fn read_on_send(&self, gauge: impl Fn() -> usize + Send + Sync + 'static) {
        *self.gauge.lock().unwrap() = Some(Arc::new(gauge));
    }

    pub fn gauge_readings(&self) -> Vec<usize> {
        self.gauge_readings.lock().unwrap().clone()
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Titles of the delivered notifications, in delivery order.
    pub fn titles(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|content| {
                content
                    .lines()
                    .find_map(|line| line.strip_prefix("Title: "))
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn ready(&self) -> Result<ChannelInfo, DeliveryError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        self.ready_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ChannelInfo {
                    id: ChannelId::new(1),
                    name: Some("help-wanted".to_string()),
                })
            })
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let gauge = self.gauge.lock().unwrap().clone();
        if let Some(gauge) = gauge {
            self.gauge_readings.lock().unwrap().push(gauge());
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.failures.lock().unwrap().remove(&attempt) {
            return Err(error);
        }
        let sent = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(notification.content().to_string());
            sent.len()
        };
        let mut cancel_after = self.cancel_after.lock().unwrap();
        if matches!(&*cancel_after, Some((after, _)) if *after == sent) {
            if let Some((_, token)) = cancel_after.take() {
                token.cancel();
            }
        }
        Ok(())
    }
}

// ─── State ───

/// Keeps the watermark in memory and remembers every committed value.
pub struct MemoryStore {
    current: Mutex<Watermark>,
    history: Mutex<Vec<Watermark>>,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
}

impl MemoryStore {
    pub fn new(initial: Watermark) -> Self {
        Self {
            current: Mutex::new(initial),
            history: Mutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self) -> Watermark {
        *self.current.lock().unwrap()
    }

    pub fn history(&self) -> Vec<Watermark> {
        self.history.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    fn io_error(message: &str) -> StateError {
        StateError::Io {
            path: PathBuf::from("memory"),
            source: std::io::Error::other(message.to_string()),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Watermark, StateError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Self::io_error("load failed"));
        }
        Ok(self.current())
    }

    async fn save(&self, watermark: Watermark) -> Result<(), StateError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Self::io_error("disk full"));
        }
        *self.current.lock().unwrap() = watermark;
        self.history.lock().unwrap().push(watermark);
        Ok(())
    }
}
