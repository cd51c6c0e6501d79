//! Wire types for the search response and their validation into [`IssueRecord`]s.

use relay::{IssueRecord, OrganizationName, RepositoryName, Timestamp};
use serde::Deserialize;
use tracing::warn;

/// One page of `GET /search/issues`.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchPage {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchItem {
    pub title: String,
    pub html_url: String,
    pub repository_url: String,
    pub created_at: Timestamp,
    /// Present only on pull requests.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl SearchItem {
    /// Validates the item, returning `None` (with a warning) when it cannot
    /// be relayed.
    pub fn into_record(self) -> Option<IssueRecord> {
        if self.pull_request.is_some() {
            warn!(url = %self.html_url, "search returned a pull request; skipping");
            return None;
        }
        let Some((organization, repository)) = parse_repository_url(&self.repository_url) else {
            warn!(
                repository_url = %self.repository_url,
                url = %self.html_url,
                "unrecognised repository_url; skipping"
            );
            return None;
        };
        Some(IssueRecord::new(
            organization,
            repository,
            self.title,
            self.html_url,
            self.created_at,
        ))
    }
}

/// Error body GitHub returns with 4xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}

/// Splits `https://api.github.com/repos/{owner}/{repo}` into its last two
/// path segments.
pub fn parse_repository_url(url: &str) -> Option<(OrganizationName, RepositoryName)> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let repository = RepositoryName::new(segments.next()?)?;
    let organization = OrganizationName::new(segments.next()?)?;
    if segments.next()? != "repos" {
        return None;
    }
    Some((organization, repository))
}
