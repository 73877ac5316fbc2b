//! In-memory [`ChatApi`] with scripted pages and injected failures.
//!
//! History pages are served in the order they were added, one per call,
//! with cursors chained automatically. Every call is recorded so callers
//! can assert on exactly which requests were made.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use pulse_core::error::{PulseError, Result};
use pulse_core::provider::{
    ChannelPage, ChatApi, HistoryRequest, MessagePage, PostOutcome, RepliesRequest, UserPage,
};
use pulse_core::types::{Channel, Message, UserInfo};
use serde_json::json;

/// One scripted page: either messages or a failure.
#[derive(Debug, Clone)]
enum Scripted<T> {
    Page(Vec<T>),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedChatApi {
    history: HashMap<String, Vec<Scripted<Message>>>,
    replies: HashMap<(String, String), Scripted<Message>>,
    channel_pages: Vec<Scripted<Channel>>,
    users: HashMap<String, UserInfo>,
    failing_users: HashSet<String>,
    identity: Option<String>,
    reject_posts: Option<String>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, String)>>,
}

impl ScriptedChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a history page for `channel`.
    pub fn history_page(mut self, channel: &str, messages: Vec<Message>) -> Self {
        self.history
            .entry(channel.to_string())
            .or_default()
            .push(Scripted::Page(messages));
        self
    }

    /// Append a failing history request for `channel`.
    pub fn history_error(mut self, channel: &str, error: &str) -> Self {
        self.history
            .entry(channel.to_string())
            .or_default()
            .push(Scripted::Fail(error.to_string()));
        self
    }

    /// Replies returned for a thread, parent echo included if given.
    pub fn replies(mut self, channel: &str, thread_ts: &str, messages: Vec<Message>) -> Self {
        self.replies.insert(
            (channel.to_string(), thread_ts.to_string()),
            Scripted::Page(messages),
        );
        self
    }

    pub fn replies_error(mut self, channel: &str, thread_ts: &str, error: &str) -> Self {
        self.replies.insert(
            (channel.to_string(), thread_ts.to_string()),
            Scripted::Fail(error.to_string()),
        );
        self
    }

    pub fn channel_page(mut self, channels: Vec<Channel>) -> Self {
        self.channel_pages.push(Scripted::Page(channels));
        self
    }

    pub fn channel_page_error(mut self, error: &str) -> Self {
        self.channel_pages.push(Scripted::Fail(error.to_string()));
        self
    }

    pub fn user(mut self, user: UserInfo) -> Self {
        self.users.insert(user.id.clone(), user);
        self
    }

    /// Make `users.info` fail for this id.
    pub fn failing_user(mut self, id: &str) -> Self {
        self.failing_users.insert(id.to_string());
        self
    }

    pub fn identity(mut self, user_id: &str) -> Self {
        self.identity = Some(user_id.to_string());
        self
    }

    /// Make every `chat.postMessage` come back with `ok: false`.
    pub fn reject_posts(mut self, error: &str) -> Self {
        self.reject_posts = Some(error.to_string());
        self
    }

    /// Every call made so far, as `"<method> <key>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(method))
            .count()
    }

    /// `(channel, text)` pairs posted successfully.
    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Cursor tokens are page indexes.
fn page_index(cursor: Option<&str>) -> usize {
    cursor.and_then(|c| c.strip_prefix("page:")).and_then(|n| n.parse().ok()).unwrap_or(0)
}

fn next_cursor(index: usize, total: usize) -> Option<String> {
    (index + 1 < total).then(|| format!("page:{}", index + 1))
}

#[async_trait]
impl ChatApi for ScriptedChatApi {
    async fn conversation_history(&self, req: &HistoryRequest) -> Result<MessagePage> {
        self.record(format!("conversations.history {}", req.channel));
        let pages = self
            .history
            .get(&req.channel)
            .ok_or_else(|| PulseError::api("conversations.history", "channel_not_found"))?;

        let index = page_index(req.cursor.as_deref());
        match pages.get(index) {
            Some(Scripted::Page(messages)) => {
                let next = next_cursor(index, pages.len());
                Ok(MessagePage {
                    messages: messages.clone(),
                    has_more: next.is_some(),
                    next_cursor: next,
                })
            }
            Some(Scripted::Fail(e)) => Err(PulseError::api("conversations.history", e.clone())),
            None => Ok(MessagePage::default()),
        }
    }

    async fn conversation_replies(&self, req: &RepliesRequest) -> Result<MessagePage> {
        self.record(format!("conversations.replies {} {}", req.channel, req.thread_ts));
        match self.replies.get(&(req.channel.clone(), req.thread_ts.clone())) {
            Some(Scripted::Page(messages)) => Ok(MessagePage {
                messages: messages.iter().take(req.limit as usize).cloned().collect(),
                has_more: false,
                next_cursor: None,
            }),
            Some(Scripted::Fail(e)) => Err(PulseError::api("conversations.replies", e.clone())),
            None => Err(PulseError::api("conversations.replies", "thread_not_found")),
        }
    }

    async fn list_channels(&self, cursor: Option<&str>, _limit: u32) -> Result<ChannelPage> {
        self.record(format!("conversations.list {}", cursor.unwrap_or("-")));
        let index = page_index(cursor);
        match self.channel_pages.get(index) {
            Some(Scripted::Page(channels)) => Ok(ChannelPage {
                channels: channels.clone(),
                next_cursor: next_cursor(index, self.channel_pages.len()),
            }),
            Some(Scripted::Fail(e)) => Err(PulseError::api("conversations.list", e.clone())),
            None => Ok(ChannelPage::default()),
        }
    }

    async fn list_users(&self, _cursor: Option<&str>, _limit: u32) -> Result<UserPage> {
        self.record("users.list -".to_string());
        let mut members: Vec<UserInfo> = self.users.values().cloned().collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(UserPage {
            members,
            next_cursor: None,
        })
    }

    async fn user_info(&self, user: &str) -> Result<UserInfo> {
        self.record(format!("users.info {}", user));
        if self.failing_users.contains(user) {
            return Err(PulseError::api("users.info", "ratelimited"));
        }
        self.users
            .get(user)
            .cloned()
            .ok_or_else(|| PulseError::api("users.info", "user_not_found"))
    }

    async fn channel_info(&self, channel: &str) -> Result<Channel> {
        self.record(format!("conversations.info {}", channel));
        self.channel_pages
            .iter()
            .filter_map(|p| match p {
                Scripted::Page(channels) => Some(channels),
                Scripted::Fail(_) => None,
            })
            .flatten()
            .find(|c| c.id == channel)
            .cloned()
            .ok_or_else(|| PulseError::api("conversations.info", "channel_not_found"))
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<PostOutcome> {
        self.record(format!("chat.postMessage {}", channel));
        if let Some(error) = &self.reject_posts {
            return Ok(PostOutcome {
                ok: false,
                ts: None,
                error: Some(error.clone()),
                raw: json!({"ok": false, "error": error}),
            });
        }
        if let Ok(mut posted) = self.posted.lock() {
            posted.push((channel.to_string(), text.to_string()));
        }
        Ok(PostOutcome {
            ok: true,
            ts: Some("1700000000.000100".into()),
            error: None,
            raw: json!({"ok": true, "channel": channel, "ts": "1700000000.000100"}),
        })
    }

    async fn auth_identity(&self) -> Result<String> {
        self.record("auth.test -".to_string());
        self.identity
            .clone()
            .ok_or_else(|| PulseError::api("auth.test", "invalid_auth"))
    }
}
