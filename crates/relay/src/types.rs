//! Shared value types for the help-relay domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! invariants (the watermark never regresses, a batch is always sorted) and
//! participate in the poll cycle's computations.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrganizationName, RepositoryName};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API. Serialises as an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 / ISO-8601 timestamp with any offset, normalised to UTC.
    pub fn parse_rfc3339(value: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(value).map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp moved back by `window`.
    ///
    /// Saturates at the earliest representable instant instead of overflowing.
    #[must_use]
    pub fn saturating_sub(self, window: Duration) -> Self {
        let delta = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        Self(
            self.0
                .checked_sub_signed(delta)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    /// Renders the timestamp with second precision and a `Z` suffix, e.g.
    /// `2024-01-01T00:00:00Z`. This is the form GitHub's search qualifiers accept.
    pub fn to_query_string(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Creation time of the most recently delivered issue, or unset.
///
/// Every issue created at or before the watermark is considered processed.
/// The value only moves forward: [`Watermark::advance`] keeps the later of the
/// current value and the candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark(Option<Timestamp>);

impl Watermark {
    /// A watermark with no prior state (first run).
    pub fn unset() -> Self {
        Self(None)
    }

    /// A watermark at `ts`.
    pub fn at(ts: Timestamp) -> Self {
        Self(Some(ts))
    }

    /// Returns the boundary timestamp, or `None` when unset.
    pub fn get(self) -> Option<Timestamp> {
        self.0
    }

    /// Returns `true` if no issue has ever been recorded.
    pub fn is_unset(self) -> bool {
        self.0.is_none()
    }

    /// Moves the watermark forward to `ts`; never moves it backward.
    #[must_use]
    pub fn advance(self, ts: Timestamp) -> Self {
        match self.0 {
            Some(current) if current >= ts => self,
            _ => Self(Some(ts)),
        }
    }

    /// Returns `true` if an issue created at `ts` has already been processed.
    pub fn covers(self, ts: Timestamp) -> bool {
        self.0.is_some_and(|current| ts <= current)
    }

    /// The exclusive "created after" bound to search from.
    ///
    /// An unset watermark resolves to `now - lookback` so a first start only
    /// relays recent issues instead of the organization's whole history.
    pub fn search_lower_bound(self, now: Timestamp, lookback: Duration) -> Timestamp {
        self.0.unwrap_or_else(|| now.saturating_sub(lookback))
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(ts) => write!(f, "{ts}"),
            None => write!(f, "unset"),
        }
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// One "help wanted" issue returned by the search endpoint.
///
/// Field order matters: the derived [`Ord`] sorts by creation time first, then
/// organization, repository, title and URL, which is the delivery order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueRecord {
    created_at: Timestamp,
    organization: OrganizationName,
    repository: RepositoryName,
    title: String,
    url: String,
}

impl IssueRecord {
    /// Creates a new [`IssueRecord`].
    pub fn new(
        organization: OrganizationName,
        repository: RepositoryName,
        title: impl Into<String>,
        url: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            created_at,
            organization,
            repository,
            title: title.into(),
            url: url.into(),
        }
    }

    pub fn organization(&self) -> &OrganizationName {
        &self.organization
    }

    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Canonical browser URL of the issue.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

/// What one organization's search produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Issues found, in no particular order.
    pub records: Vec<IssueRecord>,

    /// Set when the service stopped returning results before the end of the
    /// result set. Only issues created at or before this instant are known
    /// to be complete; newer ones must wait for a later search.
    pub complete_through: Option<Timestamp>,
}

impl SearchResults {
    /// Results covering everything the service matched.
    pub fn complete(records: Vec<IssueRecord>) -> Self {
        Self {
            records,
            complete_through: None,
        }
    }

    /// Results cut short after `through`.
    pub fn truncated(records: Vec<IssueRecord>, through: Timestamp) -> Self {
        Self {
            records,
            complete_through: Some(through),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.complete_through.is_some()
    }
}

impl From<Vec<IssueRecord>> for SearchResults {
    fn from(records: Vec<IssueRecord>) -> Self {
        Self::complete(records)
    }
}

// ---------------------------------------------------------------------------

/// The ordered set of issues one cycle will deliver.
///
/// Always sorted ascending by ([`IssueRecord`] order), free of exact
/// duplicates, and free of issues already covered by the watermark the batch
/// was assembled against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollBatch(Vec<IssueRecord>);

impl PollBatch {
    /// Merges per-organization results into a single delivery order.
    ///
    /// Remote filtering and ordering are not trusted: records the watermark
    /// already covers are dropped here and the rest are sorted globally.
    pub fn assemble(records: impl IntoIterator<Item = IssueRecord>, watermark: Watermark) -> Self {
        let mut records: Vec<IssueRecord> = records
            .into_iter()
            .filter(|r| !watermark.covers(r.created_at()))
            .collect();
        records.sort();
        records.dedup();
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IssueRecord> {
        self.0.iter()
    }

    /// Creation time of the newest issue in the batch.
    pub fn newest(&self) -> Option<Timestamp> {
        self.0.last().map(IssueRecord::created_at)
    }
}

impl IntoIterator for PollBatch {
    type Item = IssueRecord;
    type IntoIter = std::vec::IntoIter<IssueRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PollBatch {
    type Item = &'a IssueRecord;
    type IntoIter = std::slice::Iter<'a, IssueRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
