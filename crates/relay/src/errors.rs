//! Error and retry-policy types for the help-relay domain.
//!
//! Each collaborator boundary has its own error type so the poll cycle can
//! decide what a failure means for the current tick:
//!
//! | Type | Boundary | Effect on a cycle |
//! |------|----------|-------------------|
//! | [`SearchError`] | issue search | that organization is skipped for this tick |
//! | [`DeliveryError`] | output channel | remaining deliveries are abandoned for this tick |
//! | [`StateError`] | watermark store | the tick is not committed |
//! | [`RelayError`] | startup | the process does not start scheduling |
//!
//! [`RetryPolicy`] is a cross-cutting concern: search and delivery errors both
//! produce one, and it drives logging severity and the transient/fatal split.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is expected to clear on its own and, if so,
/// after what delay.
///
/// The poll cycle never retries inside a tick; the next scheduled tick is the
/// retry. The policy tells the caller whether waiting for that tick is enough
/// or whether a human has to intervene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may succeed on a later attempt.
    Retryable {
        /// Minimum back-off before the next attempt, derived from
        /// `Retry-After` style hints. `None` means no hint was given.
        after: Option<Duration>,
    },
    /// The operation will keep failing until configuration or the remote
    /// resource changes.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Search errors
// ---------------------------------------------------------------------------

/// Failure of one organization's issue search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request never produced a response (connect failure, timeout, reset).
    #[error("search request failed: {message}")]
    Network {
        /// Transport-level description.
        message: String,
    },

    /// The search service returned a 5xx.
    #[error("search service error (HTTP {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The search service throttled the request (HTTP 429, or 403 with an
    /// exhausted rate-limit budget).
    #[error("search rate limit exceeded")]
    RateLimited {
        /// Delay suggested by the service, if any.
        retry_after: Option<Duration>,
    },

    /// The search service rejected the request (4xx other than rate limiting),
    /// e.g. an unknown organization or invalid credentials.
    #[error("search request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, if one could be read.
        message: String,
    },

    /// The service answered but flagged the page as incomplete
    /// (`incomplete_results`), so issues may be missing from it.
    #[error("search results incomplete on page {page}")]
    Incomplete {
        /// Page that came back incomplete.
        page: u32,
    },

    /// The response body could not be decoded.
    #[error("malformed search response: {message}")]
    MalformedResponse {
        /// Decoder error description.
        message: String,
    },
}

impl SearchError {
    /// Classifies this error for retry decisions.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            SearchError::Network { .. }
            | SearchError::Server { .. }
            | SearchError::Incomplete { .. } => RetryPolicy::Retryable { after: None },
            SearchError::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            SearchError::Rejected { .. } | SearchError::MalformedResponse { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }

    /// Returns `true` if the next tick may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        self.retry_policy().is_retryable()
    }
}

// ---------------------------------------------------------------------------
// Delivery errors
// ---------------------------------------------------------------------------

/// Failure to post a notification to the output channel.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The destination could not be reached or returned a 5xx.
    #[error("destination temporarily unavailable: {message}")]
    Unavailable {
        /// Transport or status description.
        message: String,
    },

    /// The destination throttled the request.
    #[error("destination rate limit exceeded")]
    RateLimited {
        /// Delay suggested by the destination, if any.
        retry_after: Option<Duration>,
    },

    /// The channel does not exist or the credentials may not post to it
    /// (HTTP 401, 403 or 404).
    #[error("destination is invalid (HTTP {status}): {message}")]
    InvalidDestination {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, if one could be read.
        message: String,
    },

    /// The destination refused this particular payload.
    #[error("destination rejected the message (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, if one could be read.
        message: String,
    },
}

impl DeliveryError {
    /// Classifies this error for retry decisions.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            DeliveryError::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            DeliveryError::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            DeliveryError::InvalidDestination { .. } | DeliveryError::Rejected { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }

    /// Returns `true` if the destination is expected to recover on its own.
    pub fn is_transient(&self) -> bool {
        self.retry_policy().is_retryable()
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Failure to read or durably write the watermark.
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem failure while reading, writing, syncing or renaming.
    #[error("state file I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but does not contain a valid state record.
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        /// Path of the unreadable file.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Startup errors
// ---------------------------------------------------------------------------

/// Errors that stop the relay from starting or keep the scheduler from
/// running at all.
///
/// Failures local to one organization or one cycle never become a
/// [`RelayError`]; they are logged and retried on the next tick.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Required configuration is missing or invalid.
    ///
    /// Produced at load time; the scheduler never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// The output channel reported a permanent problem while confirming
    /// readiness (bad token, unknown channel).
    #[error("Output channel is not usable: {0}")]
    DestinationNotReady(#[source] DeliveryError),

    /// The watermark store failed outside of a cycle.
    #[error(transparent)]
    State(#[from] StateError),
}

impl RelayError {
    /// Shorthand for [`RelayError::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        RelayError::ConfigurationError {
            message: message.into(),
        }
    }
}
