use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PulseError, Result};

/// Top-level application configuration, loaded from TOML and then
/// overridden from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub report: ReportConfig,
    pub fetch: FetchConfig,
    pub delivery: DeliveryConfig,
    pub schedules: Vec<ScheduleConfig>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.config/slack-pulse/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slack-pulse")
            .join("config.toml")
    }

    /// Data directory for scheduler state.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slack-pulse")
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Blank values are ignored,
    /// and unparsable numbers leave the configured value in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("SLACK_API_TOKEN").or_else(|| get("SLACK_BOT_TOKEN")) {
            self.slack.token = Some(token);
        }
        if let Some(ids) = get("CHANNELS_ID") {
            self.report.source_channels = split_list(&ids);
        }
        if let Some(names) = get("TARGET_CHANNELS") {
            self.report.target_channels = split_list(&names);
        }
        if let Some(days) = get("DAYS_BACK").and_then(|v| v.trim().parse().ok()) {
            self.report.lookback_days = days;
        }
        if let Some(rank) = get("RANK_NUMBER")
            .and_then(|v| v.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
        {
            self.report.rank_size = rank;
        }
        if let Some(path) = get("SLACK_REPORT_PATH") {
            self.report.output_path = PathBuf::from(path);
        }
        if let Some(user) = get("SLACK_DM_USER_ID") {
            self.delivery.dm_user = Some(user);
        }
        if let Some(channel) = get("SLACK_REPORT_CHANNEL_ID") {
            self.delivery.report_channel = Some(channel);
        }
    }

    /// The API credential, or a configuration error when it is missing.
    pub fn require_token(&self) -> Result<&str> {
        self.slack
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PulseError::Config("SLACK_API_TOKEN is not set (slack.token)".into())
            })
    }

    /// Credential used for delivery: `delivery.token`, else `slack.token`.
    /// Blank values count as unset.
    pub fn delivery_token(&self) -> Option<&str> {
        let non_blank = |t: &&str| !t.trim().is_empty();
        self.delivery
            .token
            .as_deref()
            .filter(non_blank)
            .or(self.slack.token.as_deref().filter(non_blank))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Slack Web API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot or user token. Usually supplied through `SLACK_API_TOKEN`.
    pub token: Option<String>,
    /// Base URL for the Web API.
    pub api_base: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://slack.com/api".into(),
            timeout_secs: 30,
        }
    }
}

/// What to analyse and how to present it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Channel ids whose messages feed the per-user views.
    pub source_channels: Vec<String>,
    /// Channel names whose activity is ranked in the channel section.
    pub target_channels: Vec<String>,
    /// Length of the trailing window in days.
    pub lookback_days: u32,
    /// Entries per ranked section.
    pub rank_size: usize,
    /// Where the rendered report is written.
    pub output_path: PathBuf,
    /// Timezone for rendered dates, in whole hours east of UTC.
    pub utc_offset_hours: i32,
    /// Drop bot accounts (and the credential's own user) from post counts.
    pub exclude_bots: bool,
    /// Expand threads and count their replies.
    pub include_threads: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            source_channels: Vec::new(),
            target_channels: Vec::new(),
            lookback_days: 7,
            rank_size: 10,
            output_path: PathBuf::from("slack_report.txt"),
            utc_offset_hours: 9,
            exclude_bots: true,
            include_threads: true,
        }
    }
}

/// Pagination and rate-limit pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: u32,
    /// Maximum replies fetched per thread.
    pub reply_limit: u32,
    /// Pause between page requests, in milliseconds.
    pub page_delay_ms: u64,
    /// Pause between channels, in milliseconds.
    pub channel_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            reply_limit: 100,
            page_delay_ms: 100,
            channel_delay_ms: 1000,
        }
    }
}

/// Report delivery destinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Separate credential for delivery. Falls back to `slack.token`.
    pub token: Option<String>,
    /// User id that receives the report as a direct message.
    pub dm_user: Option<String>,
    /// Channel id the saved report is posted to.
    pub report_channel: Option<String>,
}

/// A cron-driven job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    /// Standard 5-field cron, or the 6/7-field form with seconds.
    pub cron: String,
    pub job: JobKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Render and save the report.
    Report,
    /// Render the report and send it as a direct message.
    SendDm,
    /// Post the saved report to the report channel.
    PostReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("slack.com/api"));
        assert!(toml_str.contains("lookback_days = 7"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.report.rank_size, config.report.rank_size);
        assert_eq!(parsed.fetch.page_size, config.fetch.page_size);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [report]
            target_channels = ["81_chatgpt", "83_claude"]
            rank_size = 5

            [[schedules]]
            name = "weekly"
            cron = "30 6 * * Mon"
            job = "send_dm"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.report.rank_size, 5);
        assert_eq!(parsed.report.lookback_days, 7);
        assert_eq!(parsed.report.target_channels.len(), 2);
        assert_eq!(parsed.schedules[0].job, JobKind::SendDm);
        assert!(parsed.schedules[0].enabled);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(lookup(&[
            ("SLACK_API_TOKEN", "xoxb-test"),
            ("CHANNELS_ID", "C1, C2,,"),
            ("TARGET_CHANNELS", "general,random"),
            ("DAYS_BACK", "14"),
            ("RANK_NUMBER", "3"),
            ("SLACK_DM_USER_ID", "U42"),
            ("SLACK_REPORT_CHANNEL_ID", "C99"),
        ]));

        assert_eq!(config.slack.token.as_deref(), Some("xoxb-test"));
        assert_eq!(config.report.source_channels, vec!["C1", "C2"]);
        assert_eq!(config.report.target_channels, vec!["general", "random"]);
        assert_eq!(config.report.lookback_days, 14);
        assert_eq!(config.report.rank_size, 3);
        assert_eq!(config.delivery.dm_user.as_deref(), Some("U42"));
        assert_eq!(config.delivery.report_channel.as_deref(), Some("C99"));
    }

    #[test]
    fn test_env_bot_token_fallback_and_bad_numbers() {
        let mut config = AppConfig::default();
        config.apply_env(lookup(&[
            ("SLACK_API_TOKEN", "  "),
            ("SLACK_BOT_TOKEN", "xoxb-bot"),
            ("DAYS_BACK", "a week"),
        ]));
        assert_eq!(config.slack.token.as_deref(), Some("xoxb-bot"));
        assert_eq!(config.report.lookback_days, 7);
    }

    #[test]
    fn test_require_token() {
        let mut config = AppConfig::default();
        assert!(matches!(config.require_token(), Err(PulseError::Config(_))));

        config.slack.token = Some("xoxb-1".into());
        assert_eq!(config.require_token().unwrap(), "xoxb-1");
    }

    #[test]
    fn test_delivery_token_fallback() {
        let mut config = AppConfig::default();
        assert!(config.delivery_token().is_none());

        config.slack.token = Some("xoxb-read".into());
        assert_eq!(config.delivery_token(), Some("xoxb-read"));

        config.delivery.token = Some("xoxb-post".into());
        assert_eq!(config.delivery_token(), Some("xoxb-post"));
    }

    #[test]
    fn test_blank_delivery_token_falls_back() {
        let config: AppConfig = toml::from_str(
            r#"
            [slack]
            token = "xoxb-read"

            [delivery]
            token = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.delivery_token(), Some("xoxb-read"));

        let mut config = AppConfig::default();
        config.slack.token = Some("   ".into());
        assert!(config.delivery_token().is_none());
    }

    #[test]
    fn test_zero_rank_number_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(lookup(&[("RANK_NUMBER", "0")]));
        assert_eq!(config.report.rank_size, 10);
    }
}
