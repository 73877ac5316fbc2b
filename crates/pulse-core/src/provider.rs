//! Capability interface over a chat platform's Web API.
//!
//! Everything the report pipeline needs from the platform goes through
//! [`ChatApi`], so any provider with equivalent operations can stand in
//! for Slack, including the in-memory one the tests use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Channel, Message, UserInfo};

/// A time-bounded `conversations.history` page request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub channel: String,
    pub oldest: String,
    pub latest: String,
    pub cursor: Option<String>,
    pub limit: u32,
}

/// A `conversations.replies` request for one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct RepliesRequest {
    pub channel: String,
    pub thread_ts: String,
    pub oldest: String,
    pub latest: String,
    pub limit: u32,
}

/// One page of messages plus the continuation cursor, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl MessagePage {
    /// The cursor to follow, or `None` once the provider says there is nothing left.
    pub fn continuation(&self) -> Option<&str> {
        if !self.has_more {
            return None;
        }
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPage {
    pub channels: Vec<Channel>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPage {
    pub members: Vec<UserInfo>,
    pub next_cursor: Option<String>,
}

/// Outcome of `chat.postMessage`. `raw` keeps the provider body for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostOutcome {
    pub ok: bool,
    pub ts: Option<String>,
    pub error: Option<String>,
    pub raw: serde_json::Value,
}

/// Operations the pipeline consumes from the chat platform.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// One page of channel history inside `[oldest, latest]`.
    async fn conversation_history(&self, req: &HistoryRequest) -> Result<MessagePage>;

    /// Replies to a thread. The first entry is usually the parent itself.
    async fn conversation_replies(&self, req: &RepliesRequest) -> Result<MessagePage>;

    /// One page of public and private channels visible to the credential.
    async fn list_channels(&self, cursor: Option<&str>, limit: u32) -> Result<ChannelPage>;

    /// One page of workspace members.
    async fn list_users(&self, cursor: Option<&str>, limit: u32) -> Result<UserPage>;

    async fn user_info(&self, user: &str) -> Result<UserInfo>;

    async fn channel_info(&self, channel: &str) -> Result<Channel>;

    /// Post `text` to a channel or user id. Only transport failures are `Err`;
    /// a provider-side rejection comes back as `ok == false`.
    async fn post_message(&self, channel: &str, text: &str) -> Result<PostOutcome>;

    /// The user id behind the credential (`auth.test`).
    async fn auth_identity(&self) -> Result<String>;
}
