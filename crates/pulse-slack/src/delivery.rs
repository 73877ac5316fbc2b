//! Report delivery: direct message, or posting a saved report to a channel.

use std::path::Path;

use pulse_core::config::AppConfig;
use pulse_core::error::{PulseError, Result};
use pulse_core::provider::{ChatApi, PostOutcome};
use tracing::{error, info};

/// A validated credential and destination pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    token: String,
    destination: String,
}

impl DeliveryTarget {
    /// Both values must be present and non-blank. `what` names the
    /// destination setting in the error message.
    pub fn new(token: Option<&str>, destination: Option<&str>, what: &str) -> Result<Self> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let destination = destination.map(str::trim).filter(|d| !d.is_empty());
        match (token, destination) {
            (Some(token), Some(destination)) => Ok(Self {
                token: token.to_string(),
                destination: destination.to_string(),
            }),
            (None, _) => Err(PulseError::Config(format!(
                "SLACK_API_TOKEN is not set; cannot deliver to {}",
                what
            ))),
            (_, None) => Err(PulseError::Config(format!("{} is not set", what))),
        }
    }

    /// Direct-message target from `delivery.dm_user`.
    pub fn direct_message(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.delivery_token(),
            config.delivery.dm_user.as_deref(),
            "SLACK_DM_USER_ID",
        )
    }

    /// Channel target from `delivery.report_channel`.
    pub fn report_channel(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.delivery_token(),
            config.delivery.report_channel.as_deref(),
            "SLACK_REPORT_CHANNEL_ID",
        )
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// Turn a provider response into success or a logged rejection.
fn confirm(outcome: PostOutcome, destination: &str) -> Result<PostOutcome> {
    if outcome.ok {
        info!("Delivered report to {}", destination);
        Ok(outcome)
    } else {
        error!("Delivery to {} failed: {}", destination, outcome.raw);
        Err(PulseError::DeliveryRejected(outcome.raw.to_string()))
    }
}

/// Send `text` as a direct message to the target user.
pub async fn send_direct_message(
    api: &dyn ChatApi,
    target: &DeliveryTarget,
    text: &str,
) -> Result<PostOutcome> {
    let outcome = api.post_message(target.destination(), text).await?;
    confirm(outcome, target.destination())
}

/// Post the contents of a previously rendered report to the target channel.
pub async fn post_report_file(
    api: &dyn ChatApi,
    target: &DeliveryTarget,
    path: &Path,
) -> Result<PostOutcome> {
    let text = read_artifact(path)?;
    let outcome = api.post_message(target.destination(), &text).await?;
    confirm(outcome, target.destination())
}

fn read_artifact(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(PulseError::ArtifactNotFound(path.to_path_buf()));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Validate the DM configuration, then connect and send. Nothing is
/// connected when the configuration is incomplete.
pub async fn deliver_direct_message<A, F>(
    config: &AppConfig,
    text: &str,
    connect: F,
) -> Result<PostOutcome>
where
    A: ChatApi,
    F: FnOnce(&str) -> Result<A>,
{
    let target = DeliveryTarget::direct_message(config)?;
    let api = connect(target.token())?;
    send_direct_message(&api, &target, text).await
}

/// Validate the channel configuration and the artifact, then connect and post.
pub async fn deliver_report_file<A, F>(
    config: &AppConfig,
    path: &Path,
    connect: F,
) -> Result<PostOutcome>
where
    A: ChatApi,
    F: FnOnce(&str) -> Result<A>,
{
    let target = DeliveryTarget::report_channel(config)?;
    if !path.is_file() {
        return Err(PulseError::ArtifactNotFound(path.to_path_buf()));
    }
    let api = connect(target.token())?;
    post_report_file(&api, &target, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedChatApi;
    use std::cell::Cell;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.slack.token = Some("xoxb-test".into());
        config.delivery.dm_user = Some("U42".into());
        config.delivery.report_channel = Some("C99".into());
        config
    }

    #[test]
    fn test_target_requires_both_values() {
        assert!(DeliveryTarget::new(Some("xoxb"), Some("U1"), "dm").is_ok());
        assert!(matches!(
            DeliveryTarget::new(None, Some("U1"), "dm"),
            Err(PulseError::Config(_))
        ));
        assert!(matches!(
            DeliveryTarget::new(Some("xoxb"), Some("   "), "dm"),
            Err(PulseError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_config_never_connects() {
        let mut config = configured();
        config.delivery.dm_user = None;
        let connected = Cell::new(false);

        let result = deliver_direct_message(&config, "report", |_token| {
            connected.set(true);
            Ok(ScriptedChatApi::new())
        })
        .await;

        assert!(matches!(result, Err(PulseError::Config(_))));
        assert!(!connected.get());
    }

    #[tokio::test]
    async fn test_missing_token_never_connects() {
        let mut config = configured();
        config.slack.token = None;
        let connected = Cell::new(false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "report").unwrap();

        let result = deliver_report_file(&config, &path, |_token| {
            connected.set(true);
            Ok(ScriptedChatApi::new())
        })
        .await;

        assert!(matches!(result, Err(PulseError::Config(_))));
        assert!(!connected.get());
    }

    #[tokio::test]
    async fn test_direct_message_sent() {
        let api = ScriptedChatApi::new();
        let target = DeliveryTarget::direct_message(&configured()).unwrap();

        let outcome = send_direct_message(&api, &target, "weekly report").await.unwrap();
        assert!(outcome.ok);
        assert_eq!(
            api.posted(),
            vec![("U42".to_string(), "weekly report".to_string())]
        );
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_not_retried() {
        let api = ScriptedChatApi::new().reject_posts("not_in_channel");
        let target = DeliveryTarget::report_channel(&configured()).unwrap();

        let result = send_direct_message(&api, &target, "text").await;
        match result {
            Err(PulseError::DeliveryRejected(raw)) => assert!(raw.contains("not_in_channel")),
            other => panic!("expected rejection, got {:?}", other.map(|o| o.ok)),
        }
        assert_eq!(api.call_count("chat.postMessage"), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let connected = Cell::new(false);

        let result = deliver_report_file(&configured(), &path, |_token| {
            connected.set(true);
            Ok(ScriptedChatApi::new())
        })
        .await;

        assert!(matches!(result, Err(PulseError::ArtifactNotFound(p)) if p == path));
        assert!(!connected.get());
    }

    #[tokio::test]
    async fn test_report_file_posted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slack_report.txt");
        std::fs::write(&path, "📊 report body").unwrap();

        let api = ScriptedChatApi::new();
        let target = DeliveryTarget::report_channel(&configured()).unwrap();
        post_report_file(&api, &target, &path).await.unwrap();

        assert_eq!(
            api.posted(),
            vec![("C99".to_string(), "📊 report body".to_string())]
        );
    }
}
