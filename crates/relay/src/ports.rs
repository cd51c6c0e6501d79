//! Port traits implemented by the infrastructure crates.
//!
//! The poll cycle is written only against these traits, which keeps it free
//! of HTTP and filesystem details and lets tests drive it with in-memory fakes.
//! All traits use `async_trait` so they stay dyn-compatible behind `Arc<dyn _>`.

use async_trait::async_trait;

use crate::{
    ChannelId, DeliveryError, Notification, OrganizationName, SearchError, SearchResults,
    StateError, Timestamp, Watermark,
};

/// Queries the external issue tracker for "help wanted" issues.
#[async_trait]
pub trait IssueSearchClient: Send + Sync {
    /// Returns issues in `organization` created strictly after `created_after`.
    ///
    /// Implementations ask the remote service for ascending creation order, but
    /// callers must not rely on it. A result set the service capped is
    /// returned with [`SearchResults::complete_through`] set.
    async fn search(
        &self,
        organization: &OrganizationName,
        created_after: Timestamp,
    ) -> Result<SearchResults, SearchError>;
}

/// Resolved output channel, reported once by [`Deliverer::ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// The configured channel.
    pub id: ChannelId,
    /// Human-readable channel name, when the destination exposes one.
    pub name: Option<String>,
}

/// Posts notifications to the configured output channel.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Confirms the session is usable and the channel resolves.
    ///
    /// The scheduler calls this once before the first tick.
    async fn ready(&self) -> Result<ChannelInfo, DeliveryError>;

    /// Sends one notification.
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Durable home of the watermark.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the persisted watermark, or [`Watermark::unset`] when nothing
    /// has been stored yet. A missing backing store is not an error.
    async fn load(&self) -> Result<Watermark, StateError>;

    /// Durably replaces the persisted watermark.
    ///
    /// When this returns `Ok`, a later [`StateStore::load`] (even after a
    /// crash) observes `watermark`.
    async fn save(&self, watermark: Watermark) -> Result<(), StateError>;
}
