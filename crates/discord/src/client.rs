//! `reqwest` implementation of [`Deliverer`].

use std::time::Duration;

use async_trait::async_trait;
use relay::{ChannelId, ChannelInfo, Deliverer, DeliveryError, Notification};
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default REST API root (v10).
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/help-relay/help-relay, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Connection settings for [`DiscordDeliverer`].
#[derive(Clone)]
pub struct DiscordConfig {
    /// REST API root, without a trailing slash.
    ///
    /// Default: `https://discord.com/api/v10`.
    pub api_url: String,

    /// Bot token (without the `Bot ` prefix).
    pub token: String,

    /// Channel notifications are posted to.
    pub channel_id: ChannelId,

    /// Per-request timeout. Default: 15 seconds.
    pub timeout: Duration,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>, channel_id: ChannelId) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            channel_id,
            timeout: Duration::from_secs(15),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("channel_id", &self.channel_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CurrentUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    allowed_mentions: AllowedMentions,
}

/// Issue titles are untrusted text; never let them ping anyone.
#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 0],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after: Option<f64>,
}

// ---------------------------------------------------------------------------
// DiscordDeliverer
// ---------------------------------------------------------------------------

/// Posts notifications to one Discord channel as a bot.
pub struct DiscordDeliverer {
    http: reqwest::Client,
    config: DiscordConfig,
}

impl DiscordDeliverer {
    /// Creates a deliverer with its own connection pool.
    pub fn new(mut config: DiscordConfig) -> Result<Self, reqwest::Error> {
        config.api_url = config.api_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.config.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeliveryError> {
        let response = self
            .http
            .get(self.url(path))
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(unavailable)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(|e| DeliveryError::Unavailable {
            message: format!("unexpected response from {path}: {e}"),
        })
    }
}

#[async_trait]
impl Deliverer for DiscordDeliverer {
    async fn ready(&self) -> Result<ChannelInfo, DeliveryError> {
        let user: CurrentUser = self.get_json("/users/@me").await?;
        info!(user = %user.username, "logged in to Discord");

        let channel: Channel = self
            .get_json(&format!("/channels/{}", self.config.channel_id))
            .await?;
        Ok(ChannelInfo {
            id: self.config.channel_id,
            name: channel.name,
        })
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let body = CreateMessage {
            content: notification.content(),
            allowed_mentions: AllowedMentions { parse: [] },
        };
        let response = self
            .http
            .post(self.url(&format!("/channels/{}/messages", self.config.channel_id)))
            .header(AUTHORIZATION, self.authorization())
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(response).await?;
        debug!(channel_id = %self.config.channel_id, "message posted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

fn unavailable(error: reqwest::Error) -> DeliveryError {
    DeliveryError::Unavailable {
        message: error.to_string(),
    }
}

/// Passes 2xx responses through and maps everything else to a [`DeliveryError`].
async fn check_status(response: Response) -> Result<Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &headers, &body))
}

fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> DeliveryError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let from_body = parsed
            .as_ref()
            .and_then(|b| b.retry_after)
            .and_then(seconds);
        let from_header = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(seconds);
        return DeliveryError::RateLimited {
            retry_after: from_body.or(from_header),
        };
    }
    if status.is_server_error() {
        return DeliveryError::Unavailable {
            message: format!("HTTP {}", status.as_u16()),
        };
    }

    let message = parsed
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            DeliveryError::InvalidDestination {
                status: status.as_u16(),
                message,
            }
        }
        _ => DeliveryError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Converts a rate-limit hint; negative, non-finite or out-of-range values are dropped.
fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}
