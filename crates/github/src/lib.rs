//! help-relay GitHub infrastructure adapter.
//!
//! Implements [`relay::IssueSearchClient`] with GitHub's issue search endpoint
//! (`GET /search/issues`) over `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Query
//! construction, pagination, authentication, rate-limit detection and
//! response validation all live here; the [`relay`] and `poller` crates only
//! see [`relay::SearchResults`] and [`relay::SearchError`].
//!
//! ## Query
//!
//! For organization `acme`, label `help wanted` and bound `T`:
//!
//! ```text
//! q=label:"help wanted" org:acme is:issue created:>T  sort=created  order=asc
//! ```
//!
//! `created:>` is strictly after, so the issue that set the watermark is not
//! returned again.

mod client;
mod response;

pub use client::{build_query, GithubSearchClient, GithubSearchConfig, DEFAULT_API_URL};
pub use response::parse_repository_url;
