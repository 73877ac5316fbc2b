use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message from a channel history or thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider timestamp, doubling as the message id (`"<secs>.<micros>"`).
    pub ts: String,
    /// Author. Absent for some system events and integrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    /// Set for bot/system messages (`bot_message`, `channel_join`, `thread_broadcast`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    #[serde(default)]
    pub text: String,
    /// Absent (not empty) when nobody reacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
}

impl Message {
    pub fn new(ts: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            user: Some(user.into()),
            ..Self::default()
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_reaction(mut self, name: &str, users: &[&str]) -> Self {
        self.reactions.get_or_insert_with(Vec::new).push(Reaction {
            name: name.to_string(),
            count: users.len() as u32,
            users: users.iter().map(|u| u.to_string()).collect(),
        });
        self
    }

    pub fn with_thread(mut self, reply_count: u32) -> Self {
        self.thread_ts = Some(self.ts.clone());
        self.reply_count = Some(reply_count);
        self
    }

    pub fn in_thread(mut self, parent_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(parent_ts.into());
        self
    }

    /// True for a message that opened a thread with at least one reply.
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count.unwrap_or(0) > 0
            && self.thread_ts.as_deref().map_or(true, |t| t == self.ts)
    }

    /// True for a reply inside someone else's thread.
    pub fn is_reply(&self) -> bool {
        matches!(&self.thread_ts, Some(t) if *t != self.ts)
    }

    /// Parse `ts` into a UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.ts)
    }
}

/// Parse a provider timestamp (`"1712345678.000200"`).
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1000)
}

/// An emoji reaction attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl UserInfo {
    /// Human-readable label: real name, then display name, then handle, then id.
    pub fn display_label(&self) -> &str {
        [
            self.real_name.as_deref(),
            self.display_name.as_deref(),
            Some(self.name.as_str()),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or(&self.id)
    }

    /// Case-insensitive match of a fragment against any of the user's names.
    pub fn matches(&self, fragment: &str) -> bool {
        let needle = fragment.to_lowercase();
        [
            self.real_name.as_deref(),
            self.display_name.as_deref(),
            Some(self.name.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|n| n.to_lowercase().contains(&needle))
    }
}
