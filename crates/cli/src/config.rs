//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the relay can be configured
//! entirely from a container's environment. [`Cli`] is the raw, parsed form;
//! [`RelayConfig::from_cli`] validates it into domain types.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use relay::{ChannelId, IssueLabel, OrganizationName, RelayError};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

/// Relay newly created "help wanted" GitHub issues to a Discord channel.
#[derive(Debug, Parser)]
#[command(name = "help-relay", version, about)]
pub struct Cli {
    /// GitHub organization to watch. Repeat the flag or pass a comma-separated list.
    #[arg(long = "org", env = "HELP_RELAY_ORGS", value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Numeric ID of the Discord channel that receives notifications.
    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Discord bot token.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub discord_token: Option<String>,

    /// GitHub token. Optional; anonymous search has a smaller rate limit.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Minutes between the starts of consecutive poll cycles.
    #[arg(long, env = "HELP_RELAY_POLL_INTERVAL_MINS", default_value_t = 30)]
    pub poll_interval_mins: u64,

    /// Minutes a first run (no saved watermark) looks back.
    #[arg(long, env = "HELP_RELAY_LOOKBACK_MINS", default_value_t = 10)]
    pub lookback_mins: u64,

    /// Issue label to search for.
    #[arg(long, env = "HELP_RELAY_LABEL", default_value = "help wanted")]
    pub label: String,

    /// Path of the JSON file holding the watermark.
    #[arg(long, env = "HELP_RELAY_STATE_FILE", default_value = "state.json")]
    pub state_file: PathBuf,

    /// GitHub REST API root.
    #[arg(long, env = "GITHUB_API_URL", default_value = github::DEFAULT_API_URL)]
    pub github_api_url: String,

    /// Discord REST API root.
    #[arg(long, env = "DISCORD_API_URL", default_value = discord::DEFAULT_API_URL)]
    pub discord_api_url: String,

    /// Log output format.
    #[arg(long, env = "HELP_RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Run a single poll cycle and exit.
    #[arg(long)]
    pub once: bool,
}

/// Validated relay configuration.
#[derive(Clone)]
pub struct RelayConfig {
    pub organizations: Vec<OrganizationName>,
    pub channel_id: ChannelId,
    pub discord_token: String,
    pub github_token: Option<String>,
    pub poll_interval: Duration,
    pub lookback: Duration,
    pub label: IssueLabel,
    pub state_file: PathBuf,
    pub github_api_url: String,
    pub discord_api_url: String,
    pub once: bool,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("organizations", &self.organizations)
            .field("channel_id", &self.channel_id)
            .field("discord_token", &"<redacted>")
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("poll_interval", &self.poll_interval)
            .field("lookback", &self.lookback)
            .field("label", &self.label)
            .field("state_file", &self.state_file)
            .field("github_api_url", &self.github_api_url)
            .field("discord_api_url", &self.discord_api_url)
            .field("once", &self.once)
            .finish()
    }
}

impl RelayConfig {
    /// Validates parsed arguments.
    ///
    /// Organizations are trimmed and deduplicated in first-seen order. A
    /// blank GitHub token counts as absent.
    pub fn from_cli(cli: Cli) -> Result<Self, RelayError> {
        let mut seen = HashSet::new();
        let organizations: Vec<OrganizationName> = cli
            .orgs
            .iter()
            .filter_map(OrganizationName::new)
            .filter(|org| seen.insert(org.clone()))
            .collect();
        if organizations.is_empty() {
            return Err(RelayError::configuration(
                "at least one organization is required (--org or HELP_RELAY_ORGS)",
            ));
        }

        let raw_channel = non_blank(cli.channel_id).ok_or_else(|| {
            RelayError::configuration("a Discord channel is required (--channel-id or DISCORD_CHANNEL_ID)")
        })?;
        let channel_id: ChannelId = raw_channel.parse().map_err(|e| {
            RelayError::configuration(format!("channel id {raw_channel:?} is not numeric: {e}"))
        })?;

        let discord_token = non_blank(cli.discord_token).ok_or_else(|| {
            RelayError::configuration("a Discord bot token is required (--discord-token or DISCORD_TOKEN)")
        })?;

        if cli.poll_interval_mins == 0 {
            return Err(RelayError::configuration(
                "poll interval must be at least one minute",
            ));
        }
        if cli.lookback_mins == 0 {
            return Err(RelayError::configuration(
                "lookback must be at least one minute",
            ));
        }

        let label = IssueLabel::new(cli.label)
            .ok_or_else(|| RelayError::configuration("label must not be blank"))?;

        Ok(Self {
            organizations,
            channel_id,
            discord_token,
            github_token: non_blank(cli.github_token),
            poll_interval: minutes(cli.poll_interval_mins),
            lookback: minutes(cli.lookback_mins),
            label,
            state_file: cli.state_file,
            github_api_url: cli.github_api_url,
            discord_api_url: cli.discord_api_url,
            once: cli.once,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}
