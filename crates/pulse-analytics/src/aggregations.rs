//! Per-user and per-channel activity tallies.
//!
//! Everything here is a pure function over fetched messages. Ranking is
//! stable: when counts tie, the key that was counted first ranks first.

use pulse_core::types::Message;
use serde::Serialize;
use std::collections::HashMap;

/// Insertion-ordered counter from identifier to count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    entries: Vec<(String, u64)>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, amount: u64) {
        match self.index.get(key) {
            Some(&i) => self.entries[i].1 += amount,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), amount));
            }
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.index.get(key).map(|&i| self.entries[i].1).unwrap_or(0)
    }

    /// The `n` highest counts, descending, ties in first-encounter order.
    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys and counts in first-encounter order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// +1 per authored message without a subtype, skipping excluded authors.
pub fn post_counts(messages: &[Message], is_excluded: impl Fn(&str) -> bool) -> Tally {
    let mut tally = Tally::new();
    for message in messages {
        if message.subtype.is_some() {
            continue;
        }
        if let Some(author) = message.user.as_deref() {
            if !is_excluded(author) {
                tally.increment(author);
            }
        }
    }
    tally
}

/// +1 for every user listed on every reaction.
pub fn reactions_given(messages: &[Message]) -> Tally {
    let mut tally = Tally::new();
    for reaction in messages.iter().flat_map(|m| m.reactions.iter().flatten()) {
        for user in &reaction.users {
            tally.increment(user);
        }
    }
    tally
}

/// Each author gains the reaction counts on their messages.
pub fn reactions_received(messages: &[Message]) -> Tally {
    let mut tally = Tally::new();
    for message in messages {
        let (Some(author), Some(reactions)) = (message.user.as_deref(), message.reactions.as_ref())
        else {
            continue;
        };
        let received: u64 = reactions.iter().map(|r| u64::from(r.count)).sum();
        if received > 0 {
            tally.add(author, received);
        }
    }
    tally
}

/// The three user-level views for one message set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserActivity {
    pub posts: Tally,
    pub reactions_given: Tally,
    pub reactions_received: Tally,
}

impl UserActivity {
    pub fn from_messages(messages: &[Message], is_excluded: impl Fn(&str) -> bool) -> Self {
        Self {
            posts: post_counts(messages, is_excluded),
            reactions_given: reactions_given(messages),
            reactions_received: reactions_received(messages),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.reactions_given.is_empty() && self.reactions_received.is_empty()
    }
}

/// Activity within a single channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelActivity {
    pub channel_id: String,
    /// Top-level messages without a subtype.
    pub posts: u64,
    pub replies: u64,
    pub thread_starts: u64,
}

impl ChannelActivity {
    pub fn from_messages(channel_id: &str, messages: &[Message]) -> Self {
        let mut activity = Self {
            channel_id: channel_id.to_string(),
            ..Self::default()
        };
        for message in messages {
            if message.subtype.is_some() {
                continue;
            }
            if message.is_reply() {
                activity.replies += 1;
                continue;
            }
            activity.posts += 1;
            if message.is_thread_parent() {
                activity.thread_starts += 1;
            }
        }
        activity
    }

    pub fn total(&self) -> u64 {
        self.posts + self.replies + self.thread_starts
    }
}

/// Stable descending sort by total.
pub fn rank_channels(mut activity: Vec<ChannelActivity>) -> Vec<ChannelActivity> {
    activity.sort_by(|a, b| b.total().cmp(&a.total()));
    activity
}
