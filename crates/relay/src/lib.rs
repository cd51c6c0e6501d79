//! Core domain for help-relay.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, error taxonomy, and port trait used by the poller. Infrastructure
//! crates (`github`, `discord`, `state`) implement the traits defined here;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`OrganizationName`, `ChannelId`, `CycleId`, etc.) |
//! | [`types`] | Value types (`Timestamp`, `Watermark`, `IssueRecord`, `SearchResults`, `PollBatch`) |
//! | [`errors`] | Search, delivery, persistence and startup errors plus [`RetryPolicy`] |
//! | [`format`] | Pure `IssueRecord` → [`Notification`] mapping |
//! | [`ports`] | `IssueSearchClient`, `Deliverer`, `StateStore` traits |

pub mod errors;
pub mod format;
pub mod identifiers;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{DeliveryError, RelayError, RetryPolicy, SearchError, StateError};
pub use format::{format_notification, Notification, MAX_NOTIFICATION_CHARS};
pub use identifiers::{ChannelId, CycleId, IssueLabel, OrganizationName, RepositoryName};
pub use ports::{ChannelInfo, Deliverer, IssueSearchClient, StateStore};
pub use types::{IssueRecord, PollBatch, SearchResults, Timestamp, Watermark};
