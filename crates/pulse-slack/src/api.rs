//! Slack Web API client over reqwest.

use async_trait::async_trait;
use pulse_core::config::{AppConfig, SlackConfig};
use pulse_core::error::{PulseError, Result};
use pulse_core::provider::{
    ChannelPage, ChatApi, HistoryRequest, MessagePage, PostOutcome, RepliesRequest, UserPage,
};
use pulse_core::types::{Channel, Message, UserInfo};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

impl From<HistoryResponse> for MessagePage {
    fn from(resp: HistoryResponse) -> Self {
        MessagePage {
            messages: resp.messages,
            has_more: resp.has_more,
            next_cursor: resp.response_metadata.and_then(|m| m.next_cursor),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    channel: Channel,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

/// `users.info` / `users.list` member. The display name lives in the profile.
#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: RawProfile,
}

impl From<RawUser> for UserInfo {
    fn from(raw: RawUser) -> Self {
        UserInfo {
            id: raw.id,
            name: raw.name,
            real_name: raw.real_name.or(raw.profile.real_name),
            display_name: raw.profile.display_name,
            is_bot: raw.is_bot,
            deleted: raw.deleted,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    members: Vec<RawUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

/// Reject `ok: false` bodies with the provider's error code.
fn check_ok(method: &str, body: &Value) -> Result<()> {
    if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        Ok(())
    } else {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Err(PulseError::api(method, message))
    }
}

pub struct SlackApi {
    client: Client,
    token: String,
    api_base: String,
}

impl SlackApi {
    pub fn new(token: impl Into<String>, config: &SlackConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent("slack-pulse/0.1")
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the configured read credential.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = config.require_token()?;
        Self::new(token, &config.slack)
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn get_raw(&self, method: &str, query: &[(&str, String)]) -> Result<Value> {
        debug!("GET {} {:?}", method, query.iter().map(|(k, _)| *k).collect::<Vec<_>>());
        let resp = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let body = self.get_raw(method, query).await?;
        check_ok(method, &body)?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl ChatApi for SlackApi {
    async fn conversation_history(&self, req: &HistoryRequest) -> Result<MessagePage> {
        let mut query = vec![
            ("channel", req.channel.clone()),
            ("oldest", req.oldest.clone()),
            ("latest", req.latest.clone()),
            ("inclusive", "true".to_string()),
            ("limit", req.limit.to_string()),
        ];
        if let Some(cursor) = &req.cursor {
            query.push(("cursor", cursor.clone()));
        }
        let resp: HistoryResponse = self.get("conversations.history", &query).await?;
        Ok(resp.into())
    }

    async fn conversation_replies(&self, req: &RepliesRequest) -> Result<MessagePage> {
        let query = [
            ("channel", req.channel.clone()),
            ("ts", req.thread_ts.clone()),
            ("oldest", req.oldest.clone()),
            ("latest", req.latest.clone()),
            ("inclusive", "true".to_string()),
            ("limit", req.limit.to_string()),
        ];
        let resp: HistoryResponse = self.get("conversations.replies", &query).await?;
        Ok(resp.into())
    }

    async fn list_channels(&self, cursor: Option<&str>, limit: u32) -> Result<ChannelPage> {
        let mut query = vec![
            ("types", "public_channel,private_channel".to_string()),
            ("exclude_archived", "true".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let resp: ChannelListResponse = self.get("conversations.list", &query).await?;
        Ok(ChannelPage {
            channels: resp.channels,
            next_cursor: resp.response_metadata.and_then(|m| m.next_cursor),
        })
    }

    async fn list_users(&self, cursor: Option<&str>, limit: u32) -> Result<UserPage> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let resp: UserListResponse = self.get("users.list", &query).await?;
        Ok(UserPage {
            members: resp.members.into_iter().map(UserInfo::from).collect(),
            next_cursor: resp.response_metadata.and_then(|m| m.next_cursor),
        })
    }

    async fn user_info(&self, user: &str) -> Result<UserInfo> {
        let resp: UserInfoResponse = self
            .get("users.info", &[("user", user.to_string())])
            .await?;
        Ok(resp.user.into())
    }

    async fn channel_info(&self, channel: &str) -> Result<Channel> {
        let resp: ChannelInfoResponse = self
            .get("conversations.info", &[("channel", channel.to_string())])
            .await?;
        Ok(resp.channel)
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<PostOutcome> {
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
        });

        let resp = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let raw: Value = resp.json().await?;
        Ok(post_outcome(raw))
    }

    async fn auth_identity(&self) -> Result<String> {
        let resp: AuthTestResponse = self.get("auth.test", &[]).await?;
        Ok(resp.user_id)
    }
}

fn post_outcome(raw: Value) -> PostOutcome {
    PostOutcome {
        ok: raw.get("ok").and_then(Value::as_bool).unwrap_or(false),
        ts: raw.get("ts").and_then(Value::as_str).map(String::from),
        error: raw.get("error").and_then(Value::as_str).map(String::from),
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_ok() {
        assert!(check_ok("auth.test", &json!({"ok": true})).is_ok());

        let err = check_ok("conversations.history", &json!({"ok": false, "error": "not_in_channel"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Slack API error: conversations.history: not_in_channel"
        );

        let err = check_ok("users.info", &json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown error"));
    }

    #[test]
    fn test_history_response_to_page() {
        let body = json!({
            "ok": true,
            "messages": [
                {"type": "message", "user": "U1", "text": "hi", "ts": "1700000000.000100"},
                {"type": "message", "subtype": "channel_join", "user": "U2", "text": "", "ts": "1700000001.000100"}
            ],
            "has_more": true,
            "response_metadata": {"next_cursor": "bmV4dF90czox"}
        });
        let resp: HistoryResponse = serde_json::from_value(body).unwrap();
        let page: MessagePage = resp.into();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[1].subtype.as_deref(), Some("channel_join"));
        assert_eq!(page.continuation(), Some("bmV4dF90czox"));
    }

    #[test]
    fn test_raw_user_profile_names() {
        let body = json!({
            "ok": true,
            "user": {
                "id": "U1",
                "name": "ichiro",
                "is_bot": false,
                "profile": {"display_name": "ichi", "real_name": "Ichiro T"}
            }
        });
        let resp: UserInfoResponse = serde_json::from_value(body).unwrap();
        let user: UserInfo = resp.user.into();
        assert_eq!(user.real_name.as_deref(), Some("Ichiro T"));
        assert_eq!(user.display_name.as_deref(), Some("ichi"));
        assert_eq!(user.display_label(), "Ichiro T");
    }

    #[test]
    fn test_post_outcome_keeps_raw_body() {
        let outcome = post_outcome(json!({"ok": false, "error": "channel_not_found"}));
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("channel_not_found"));
        assert_eq!(outcome.raw["error"], "channel_not_found");

        let outcome = post_outcome(json!({"ok": true, "ts": "1700000000.000100"}));
        assert!(outcome.ok);
        assert_eq!(outcome.ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let config = SlackConfig {
            api_base: "http://localhost:9000/api/".into(),
            ..SlackConfig::default()
        };
        let api = SlackApi::new("xoxb-test", &config).unwrap();
        assert_eq!(api.url("auth.test"), "http://localhost:9000/api/auth.test");
    }
}
