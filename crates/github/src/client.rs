//! `reqwest` implementation of [`IssueSearchClient`].

use std::time::Duration;

use async_trait::async_trait;
use relay::{
    IssueLabel, IssueSearchClient, OrganizationName, SearchError, SearchResults, Timestamp,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::response::{ErrorBody, SearchPage};

/// Default REST API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Largest page size the search API accepts.
const MAX_PER_PAGE: u32 = 100;

/// The search API never returns more than 1000 results per query.
const MAX_SEARCH_RESULTS: u32 = 1000;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("help-relay/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`GithubSearchClient`].
#[derive(Debug, Clone)]
pub struct GithubSearchConfig {
    /// REST API root, without a trailing slash.
    ///
    /// Default: `https://api.github.com`.
    pub api_url: String,

    /// Personal access or installation token. Anonymous requests work but
    /// share a much smaller rate-limit budget.
    pub token: Option<String>,

    /// Label to search for. Default: `help wanted`.
    pub label: IssueLabel,

    /// Per-request timeout. Default: 30 seconds.
    pub timeout: Duration,

    /// Results per page, capped at 100. Default: 100.
    pub per_page: u32,
}

impl Default for GithubSearchConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            label: IssueLabel::default(),
            timeout: Duration::from_secs(30),
            per_page: MAX_PER_PAGE,
        }
    }
}

/// Builds the `q` parameter for one organization.
pub fn build_query(label: &IssueLabel, organization: &OrganizationName, created_after: Timestamp) -> String {
    format!(
        "label:\"{label}\" org:{organization} is:issue created:>{}",
        created_after.to_query_string()
    )
}

/// Searches GitHub for newly created "help wanted" issues.
pub struct GithubSearchClient {
    http: reqwest::Client,
    config: GithubSearchConfig,
}

impl GithubSearchClient {
    /// Creates a client with its own connection pool.
    pub fn new(mut config: GithubSearchConfig) -> Result<Self, reqwest::Error> {
        config.api_url = config.api_url.trim_end_matches('/').to_string();
        config.per_page = config.per_page.clamp(1, MAX_PER_PAGE);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn max_pages(&self) -> u32 {
        MAX_SEARCH_RESULTS.div_ceil(self.config.per_page)
    }

    async fn fetch_page(&self, query: &str, page: u32) -> Result<SearchPage, SearchError> {
        let per_page = self.config.per_page.to_string();
        let page = page.to_string();
        let mut request = self
            .http
            .get(format!("{}/search/issues", self.config.api_url))
            .query(&[
                ("q", query),
                ("sort", "created"),
                ("order", "asc"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ]);
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(classify_failure(status, &headers, &body));
        }

        serde_json::from_str(&body).map_err(|e| SearchError::MalformedResponse {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl IssueSearchClient for GithubSearchClient {
    /// Pages through the results in ascending creation order.
    ///
    /// A page flagged `incomplete_results` fails the whole search with
    /// [`SearchError::Incomplete`]. When the 1000-result cap is reached the
    /// records are returned as truncated through the newest creation time seen.
    async fn search(
        &self,
        organization: &OrganizationName,
        created_after: Timestamp,
    ) -> Result<SearchResults, SearchError> {
        let query = build_query(&self.config.label, organization, created_after);
        let per_page = self.config.per_page as usize;
        let max_pages = self.max_pages();

        let mut records = Vec::new();
        let mut newest_seen: Option<Timestamp> = None;
        let mut seen: u64 = 0;
        let mut page = 1;
        let truncated = loop {
            let body = self.fetch_page(&query, page).await?;
            if body.incomplete_results {
                warn!(%organization, page, "search timed out server-side; retrying organization next cycle");
                return Err(SearchError::Incomplete { page });
            }

            let count = body.items.len();
            seen += count as u64;
            newest_seen = body.items.iter().map(|item| item.created_at).chain(newest_seen).max();
            records.extend(body.items.into_iter().filter_map(|item| item.into_record()));

            if count < per_page || seen >= body.total_count {
                break false;
            }
            if page >= max_pages {
                break true;
            }
            page += 1;
        };

        debug!(%organization, %created_after, count = records.len(), pages = page, "search finished");
        match newest_seen {
            Some(through) if truncated => {
                warn!(
                    %organization,
                    %through,
                    "search result cap reached; newer issues wait for a later cycle"
                );
                Ok(SearchResults::truncated(records, through))
            }
            _ => Ok(SearchResults::complete(records)),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

fn network_error(error: reqwest::Error) -> SearchError {
    SearchError::Network {
        message: error.to_string(),
    }
}

/// Maps a non-2xx response to a [`SearchError`].
///
/// GitHub signals an exhausted primary rate limit with 403 and
/// `x-ratelimit-remaining: 0`, and secondary limits with 403 or 429 plus
/// `retry-after`; all of those are transient.
fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> SearchError {
    let remaining_exhausted = header_str(headers, "x-ratelimit-remaining") == Some("0");
    let has_retry_after = headers.contains_key(RETRY_AFTER);

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (remaining_exhausted || has_retry_after))
    {
        return SearchError::RateLimited {
            retry_after: retry_after(headers),
        };
    }
    if status.is_server_error() {
        return SearchError::Server {
            status: status.as_u16(),
        };
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    SearchError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Reads `retry-after` (seconds), falling back to `x-ratelimit-reset` (epoch seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, "x-ratelimit-reset")?.parse::<i64>().ok()?;
    let wait = reset - chrono::Utc::now().timestamp();
    u64::try_from(wait).ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use relay::IssueRecord;
    use serde_json::json;

    fn ts(value: &str) -> Timestamp {
        Timestamp::parse_rfc3339(value).unwrap()
    }

    fn org(name: &str) -> OrganizationName {
        OrganizationName::new(name).unwrap()
    }

    fn client(server: &mockito::Server, token: Option<&str>, per_page: u32) -> GithubSearchClient {
        GithubSearchClient::new(GithubSearchConfig {
            api_url: server.url(),
            token: token.map(str::to_string),
            per_page,
            ..GithubSearchConfig::default()
        })
        .unwrap()
    }

    fn item(repo: &str, number: u32, created: &str) -> serde_json::Value {
        json!({
            "title": format!("Issue {number}"),
            "html_url": format!("https://github.com/acme/{repo}/issues/{number}"),
            "repository_url": format!("https://api.github.com/repos/acme/{repo}"),
            "created_at": created,
            "number": number,
            "state": "open"
        })
    }

    #[test]
    fn query_uses_label_org_type_and_strict_bound() {
        let query = build_query(
            &IssueLabel::default(),
            &org("learningequality"),
            ts("2024-01-01T00:00:00.5Z"),
        );
        assert_eq!(
            query,
            "label:\"help wanted\" org:learningequality is:issue created:>2024-01-01T00:00:00Z"
        );
    }

    #[tokio::test]
    async fn search_sends_expected_request_and_parses_items() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "q".into(),
                    "label:\"help wanted\" org:acme is:issue created:>2024-01-01T00:00:00Z".into(),
                ),
                Matcher::UrlEncoded("sort".into(), "created".into()),
                Matcher::UrlEncoded("order".into(), "asc".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .match_header("accept", "application/vnd.github+json")
            .match_header("authorization", "Bearer secret")
            .match_header("user-agent", Matcher::Regex("^help-relay/".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "total_count": 2,
                    "incomplete_results": false,
                    "items": [
                        item("api", 1, "2024-01-01T01:00:00Z"),
                        item("web", 2, "2024-01-01T02:00:00Z")
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let results = client(&server, Some("secret"), 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(!results.is_truncated());
        let records = results.records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].repository().as_str(), "api");
        assert_eq!(records[1].title(), "Issue 2");
        assert_eq!(records[1].created_at(), ts("2024-01-01T02:00:00Z"));
    }

    #[tokio::test]
    async fn anonymous_requests_send_no_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(json!({ "total_count": 0, "items": [] }).to_string())
            .create_async()
            .await;

        let results = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(results.records.is_empty());
    }

    #[tokio::test]
    async fn follows_pages_until_total_count() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "2".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "total_count": 3,
                    "items": [
                        item("api", 1, "2024-01-01T01:00:00Z"),
                        item("api", 2, "2024-01-01T02:00:00Z")
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "2".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "total_count": 3,
                    "items": [item("api", 3, "2024-01-01T03:00:00Z")]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let results = client(&server, None, 2)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let titles: Vec<&str> = results.records.iter().map(IssueRecord::title).collect();
        assert_eq!(titles, ["Issue 1", "Issue 2", "Issue 3"]);
        assert!(!results.is_truncated());
    }

    #[tokio::test]
    async fn incomplete_page_fails_the_search_transiently() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "total_count": 1,
                    "incomplete_results": true,
                    "items": [item("api", 1, "2024-01-01T01:00:00Z")]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Incomplete { page: 1 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn result_cap_marks_results_truncated_at_newest_seen() {
        let mut server = mockito::Server::new_async().await;
        let items: Vec<serde_json::Value> = (0..100u32)
            .map(|i| item("api", i, &format!("2024-01-01T01:{:02}:{:02}Z", i / 60, i % 60)))
            .collect();
        let mock = server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "total_count": 5000, "items": items }).to_string())
            .expect(10)
            .create_async()
            .await;

        let results = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(results.is_truncated());
        assert_eq!(results.complete_through, Some(ts("2024-01-01T01:01:39Z")));
        assert_eq!(results.records.len(), 1000);
    }

    #[tokio::test]
    async fn rate_limit_responses_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "60")
            .with_body(json!({ "message": "API rate limit exceeded" }).to_string())
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SearchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(60)
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn exhausted_primary_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .with_body(json!({ "message": "API rate limit exceeded" }).to_string())
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Server { status: 502 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn validation_failures_are_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(422)
            .with_body(json!({ "message": "Validation Failed", "errors": [] }).to_string())
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("no-such-org"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, SearchError::Rejected { status: 422, ref message } if message == "Validation Failed")
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn malformed_bodies_are_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/issues")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let err = client(&server, None, 100)
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::MalformedResponse { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let client = GithubSearchClient::new(GithubSearchConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(5),
            ..GithubSearchConfig::default()
        })
        .unwrap();

        let err = client
            .search(&org("acme"), ts("2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Network { .. }));
        assert!(err.is_transient());
    }
}
