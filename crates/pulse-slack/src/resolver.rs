//! Provider-backed name resolution, bot detection, and channel enumeration.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::error::Result;
use pulse_core::names::NameResolver;
use pulse_core::provider::ChatApi;
use pulse_core::types::{Channel, Message, UserInfo};
use tracing::{debug, info, warn};

/// Resolves names through the chat API, caching every lookup for the run.
///
/// One `users.info` call per unique user answers both the display name and
/// the bot check. Failed lookups are cached too, so a flaky id is not retried
/// for every message it authored.
pub struct SlackNameResolver<'a> {
    api: &'a dyn ChatApi,
    users: Mutex<HashMap<String, Option<UserInfo>>>,
    channels: Mutex<HashMap<String, String>>,
}

impl<'a> SlackNameResolver<'a> {
    pub fn new(api: &'a dyn ChatApi) -> Self {
        Self {
            api,
            users: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Seed channel names already known from enumeration.
    pub fn remember_channels(&self, channels: &[Channel]) {
        if let Ok(mut cache) = self.channels.lock() {
            for channel in channels {
                cache.insert(channel.id.clone(), channel.name.clone());
            }
        }
    }

    async fn lookup_user(&self, user_id: &str) -> Option<UserInfo> {
        if let Some(cached) = self.users.lock().ok().and_then(|c| c.get(user_id).cloned()) {
            return cached;
        }

        let info = match self.api.user_info(user_id).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("User lookup failed for {}: {}", user_id, e);
                None
            }
        };
        if let Ok(mut cache) = self.users.lock() {
            cache.insert(user_id.to_string(), info.clone());
        }
        info
    }

    /// Whether the account is a bot. Unknown accounts count as human.
    pub async fn is_bot(&self, user_id: &str) -> bool {
        self.lookup_user(user_id)
            .await
            .map(|u| u.is_bot)
            .unwrap_or(false)
    }

    /// Authors in `messages` that should not count as posters: accounts that
    /// `users.info` reports as bots, and `self_id` if given.
    ///
    /// A message posted through an app (`bot_id` set) on behalf of a human
    /// does not make that human a bot; the author is judged by account only.
    pub async fn bot_authors(&self, messages: &[Message], self_id: Option<&str>) -> HashSet<String> {
        let mut bots = HashSet::new();
        if let Some(id) = self_id {
            bots.insert(id.to_string());
        }

        let mut seen = HashSet::new();
        for message in messages {
            let Some(author) = message.user.as_deref() else {
                continue;
            };
            if message.subtype.is_some() || !seen.insert(author) {
                continue;
            }
            if self.is_bot(author).await {
                bots.insert(author.to_string());
            }
        }

        debug!("{} bot author(s) excluded", bots.len());
        bots
    }
}

#[async_trait]
impl<'a> NameResolver for SlackNameResolver<'a> {
    async fn user_name(&self, user_id: &str) -> String {
        self.lookup_user(user_id)
            .await
            .map(|u| u.display_label().to_string())
            .unwrap_or_else(|| user_id.to_string())
    }

    async fn channel_name(&self, channel_id: &str) -> String {
        if let Some(name) = self
            .channels
            .lock()
            .ok()
            .and_then(|c| c.get(channel_id).cloned())
        {
            return name;
        }

        let name = match self.api.channel_info(channel_id).await {
            Ok(channel) if !channel.name.is_empty() => channel.name,
            Ok(_) => channel_id.to_string(),
            Err(e) => {
                warn!("Channel name lookup failed for {}: {}", channel_id, e);
                channel_id.to_string()
            }
        };
        if let Ok(mut cache) = self.channels.lock() {
            cache.insert(channel_id.to_string(), name.clone());
        }
        name
    }
}

/// Configured target channel names split into those that exist and those that don't.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetChannels {
    /// In configured order.
    pub found: Vec<Channel>,
    pub missing: Vec<String>,
}

impl TargetChannels {
    pub fn ids(&self) -> Vec<String> {
        self.found.iter().map(|c| c.id.clone()).collect()
    }
}

/// Match configured names (with or without a leading `#`) against `channels`.
pub fn select_targets(channels: &[Channel], names: &[String]) -> TargetChannels {
    let mut targets = TargetChannels::default();
    for name in names {
        let wanted = name.trim().trim_start_matches('#');
        match channels.iter().find(|c| c.name == wanted) {
            Some(channel) => {
                if !targets.found.iter().any(|c| c.id == channel.id) {
                    targets.found.push(channel.clone());
                }
            }
            None => targets.missing.push(name.clone()),
        }
    }
    targets
}

/// Enumerates the channels the credential can see.
pub struct ChannelDirectory<'a> {
    api: &'a dyn ChatApi,
    page_size: u32,
    page_delay: Duration,
}

impl<'a> ChannelDirectory<'a> {
    pub fn new(api: &'a dyn ChatApi, page_size: u32, page_delay: Duration) -> Self {
        Self {
            api,
            page_size,
            page_delay,
        }
    }

    /// Public and private channels, following cursors like history fetching.
    /// A failed page ends the walk with what was collected so far.
    pub async fn list_all(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.api.list_channels(cursor.as_deref(), self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Channel listing stopped after {} channels: {}", channels.len(), e);
                    break;
                }
            };

            channels.extend(page.channels);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        channels
    }

    pub async fn resolve_targets(&self, names: &[String]) -> TargetChannels {
        let channels = self.list_all().await;
        let targets = select_targets(&channels, names);
        info!(
            "Target channels: {} found, {} missing",
            targets.found.len(),
            targets.missing.len()
        );
        for name in &targets.missing {
            warn!("Target channel not found: {}", name);
        }
        targets
    }
}

/// Users whose real name, display name, or handle contains `fragment`.
pub async fn find_users(api: &dyn ChatApi, fragment: &str) -> Result<Vec<UserInfo>> {
    let mut matches = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = api.list_users(cursor.as_deref(), 200).await?;
        matches.extend(page.members.into_iter().filter(|u| !u.deleted && u.matches(fragment)));
        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedChatApi;

    fn user(id: &str, real_name: &str, is_bot: bool) -> UserInfo {
        UserInfo {
            id: id.into(),
            name: id.to_lowercase(),
            real_name: Some(real_name.into()),
            is_bot,
            ..UserInfo::default()
        }
    }

    fn channel(id: &str, name: &str) -> Channel {
        Channel {
            id: id.into(),
            name: name.into(),
            ..Channel::default()
        }
    }

    #[tokio::test]
    async fn test_user_name_resolves_and_caches() {
        let api = ScriptedChatApi::new().user(user("U1", "Hana Sato", false));
        let resolver = SlackNameResolver::new(&api);

        assert_eq!(resolver.user_name("U1").await, "Hana Sato");
        assert_eq!(resolver.user_name("U1").await, "Hana Sato");
        assert_eq!(api.call_count("users.info"), 1);
    }

    #[tokio::test]
    async fn test_user_name_falls_back_to_id() {
        let api = ScriptedChatApi::new().failing_user("U9");
        let resolver = SlackNameResolver::new(&api);

        assert_eq!(resolver.user_name("U9").await, "U9");
        assert_eq!(resolver.user_name("U404").await, "U404");
        // Failures are cached as well.
        assert_eq!(resolver.user_name("U9").await, "U9");
        assert_eq!(api.call_count("users.info"), 2);
    }

    #[tokio::test]
    async fn test_channel_name_fallback_and_seed() {
        let api = ScriptedChatApi::new().channel_page(vec![channel("C1", "general")]);
        let resolver = SlackNameResolver::new(&api);

        assert_eq!(resolver.channel_name("C1").await, "general");
        assert_eq!(resolver.channel_name("C404").await, "C404");

        resolver.remember_channels(&[channel("C2", "random")]);
        assert_eq!(resolver.channel_name("C2").await, "random");
        assert_eq!(api.call_count("conversations.info"), 2);
    }

    #[tokio::test]
    async fn test_bot_authors_one_lookup_per_author() {
        let api = ScriptedChatApi::new()
            .user(user("U1", "Hana", false))
            .user(user("B1", "Reminder Bot", true));
        let resolver = SlackNameResolver::new(&api);

        let messages = vec![
            Message::new("1.0", "U1"),
            Message::new("2.0", "B1"),
            Message::new("3.0", "U1"),
            Message::new("4.0", "B1"),
            Message::new("6.0", "U3").with_subtype("channel_join"),
        ];

        let bots = resolver.bot_authors(&messages, Some("USELF")).await;
        let mut bots: Vec<_> = bots.into_iter().collect();
        bots.sort();
        assert_eq!(bots, vec!["B1", "USELF"]);
        assert_eq!(api.call_count("users.info"), 2);
    }

    #[tokio::test]
    async fn test_app_message_does_not_exclude_human_author() {
        let api = ScriptedChatApi::new().user(user("U1", "Hana", false));
        let resolver = SlackNameResolver::new(&api);

        let mut giphy = Message::new("3.0", "U1");
        giphy.bot_id = Some("BGIPHY".into());
        let messages = vec![Message::new("1.0", "U1"), Message::new("2.0", "U1"), giphy];

        let bots = resolver.bot_authors(&messages, None).await;
        assert!(bots.is_empty());
    }

    #[tokio::test]
    async fn test_app_message_from_bot_account_excluded() {
        let api = ScriptedChatApi::new().user(user("B1", "Reminder Bot", true));
        let resolver = SlackNameResolver::new(&api);

        let mut reminder = Message::new("1.0", "B1");
        reminder.bot_id = Some("B0001".into());

        let bots = resolver.bot_authors(&[reminder], None).await;
        assert!(bots.contains("B1"));
    }

    #[test]
    fn test_select_targets_found_and_missing() {
        let channels = vec![
            channel("C1", "81_chatgpt"),
            channel("C2", "83_claude"),
            channel("C3", "random"),
        ];
        let names = vec![
            "83_claude".to_string(),
            "#81_chatgpt".to_string(),
            "99_missing".to_string(),
        ];

        let targets = select_targets(&channels, &names);
        assert_eq!(targets.ids(), vec!["C2", "C1"]);
        assert_eq!(targets.missing, vec!["99_missing"]);
    }

    #[tokio::test]
    async fn test_list_all_paginates_and_keeps_partial() {
        let api = ScriptedChatApi::new()
            .channel_page(vec![channel("C1", "general")])
            .channel_page(vec![channel("C2", "random")])
            .channel_page_error("ratelimited");
        let directory = ChannelDirectory::new(&api, 200, Duration::ZERO);

        let channels = directory.list_all().await;
        assert_eq!(channels.len(), 2);
        assert_eq!(api.call_count("conversations.list"), 3);
    }

    #[tokio::test]
    async fn test_resolve_targets() {
        let api = ScriptedChatApi::new()
            .channel_page(vec![channel("C1", "general")])
            .channel_page(vec![channel("C2", "random")]);
        let directory = ChannelDirectory::new(&api, 200, Duration::ZERO);

        let targets = directory
            .resolve_targets(&["random".to_string(), "nope".to_string()])
            .await;
        assert_eq!(targets.ids(), vec!["C2"]);
        assert_eq!(targets.missing, vec!["nope"]);
    }

    #[tokio::test]
    async fn test_find_users() {
        let mut gone = user("U3", "Ichiro Old", false);
        gone.deleted = true;
        let api = ScriptedChatApi::new()
            .user(user("U1", "Ichiro Tanaka", false))
            .user(user("U2", "Hana Sato", false))
            .user(gone);

        let found = find_users(&api, "ichiro").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "U1");
    }
}
