//! Paginated history fetching inside a lookback window.

use std::time::Duration;

use pulse_core::config::AppConfig;
use pulse_core::provider::{ChatApi, HistoryRequest, RepliesRequest};
use pulse_core::types::Message;
use pulse_core::window::LookbackWindow;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: u32,
    pub reply_limit: u32,
    pub page_delay: Duration,
    pub channel_delay: Duration,
    pub include_threads: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            reply_limit: 100,
            page_delay: Duration::from_millis(100),
            channel_delay: Duration::from_millis(1000),
            include_threads: true,
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            page_size: config.fetch.page_size,
            reply_limit: config.fetch.reply_limit,
            page_delay: Duration::from_millis(config.fetch.page_delay_ms),
            channel_delay: Duration::from_millis(config.fetch.channel_delay_ms),
            include_threads: config.report.include_threads,
        }
    }

    /// No pacing; for tests and offline providers.
    pub fn immediate() -> Self {
        Self {
            page_delay: Duration::ZERO,
            channel_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Everything fetched from one channel.
#[derive(Debug, Clone)]
pub struct ChannelHistory {
    pub channel_id: String,
    pub messages: Vec<Message>,
}

/// Walks channel history page by page.
///
/// Request failures never reach the caller: pagination stops and whatever
/// was gathered before the failure is returned. Failed pages are not retried.
pub struct MessageFetcher<'a> {
    api: &'a dyn ChatApi,
    options: FetchOptions,
}

impl<'a> MessageFetcher<'a> {
    pub fn new(api: &'a dyn ChatApi, options: FetchOptions) -> Self {
        Self { api, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// All messages in `channel` inside `window`, thread replies placed right
    /// after their parent when thread expansion is on.
    pub async fn fetch(&self, channel: &str, window: &LookbackWindow) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_no = 0usize;

        loop {
            page_no += 1;
            let req = HistoryRequest {
                channel: channel.to_string(),
                oldest: window.oldest_param(),
                latest: window.latest_param(),
                cursor: cursor.take(),
                limit: self.options.page_size,
            };

            let page = match self.api.conversation_history(&req).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        "History fetch for {} failed on page {}, keeping {} messages: {}",
                        channel,
                        page_no,
                        messages.len(),
                        e
                    );
                    break;
                }
            };

            if page.messages.is_empty() {
                break;
            }
            debug!("{} page {}: {} messages", channel, page_no, page.messages.len());

            let next = page.continuation().map(String::from);
            for message in page.messages {
                let expand = self.options.include_threads && message.is_thread_parent();
                let parent_ts = message.ts.clone();
                messages.push(message);
                if expand {
                    let replies = self.fetch_replies(channel, &parent_ts, window).await;
                    messages.extend(replies);
                }
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
            self.pause(self.options.page_delay).await;
        }

        info!("Fetched {} messages from {}", messages.len(), channel);
        messages
    }

    /// Replies to one thread in `window`, minus the parent echo and replies
    /// that carry a subtype (those are already in the channel history).
    pub async fn fetch_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        window: &LookbackWindow,
    ) -> Vec<Message> {
        self.pause(self.options.page_delay).await;

        let req = RepliesRequest {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
            oldest: window.oldest_param(),
            latest: window.latest_param(),
            limit: self.options.reply_limit,
        };

        match self.api.conversation_replies(&req).await {
            Ok(page) => page
                .messages
                .into_iter()
                .filter(|m| m.ts != thread_ts)
                .filter(|m| m.subtype.is_none())
                .filter(|m| window.contains_ts(&m.ts))
                .take(self.options.reply_limit as usize)
                .collect(),
            Err(e) => {
                warn!("Skipping thread {} in {}: {}", thread_ts, channel, e);
                Vec::new()
            }
        }
    }

    /// Fetch several channels in order, pausing between channels.
    pub async fn fetch_channels(
        &self,
        channels: &[String],
        window: &LookbackWindow,
    ) -> Vec<ChannelHistory> {
        let mut histories = Vec::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            if i > 0 {
                self.pause(self.options.channel_delay).await;
            }
            histories.push(ChannelHistory {
                channel_id: channel.clone(),
                messages: self.fetch(channel, window).await,
            });
        }
        histories
    }

    async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedChatApi;
    use chrono::{TimeZone, Utc};

    fn window() -> LookbackWindow {
        LookbackWindow::new(
            Utc.with_ymd_and_hms(2025, 9, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 9, 22, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    /// A timestamp `offset` seconds into the test window.
    fn ts(offset: i64) -> String {
        let base = Utc.with_ymd_and_hms(2025, 9, 15, 0, 0, 0).unwrap().timestamp();
        format!("{}.000100", base + offset)
    }

    fn msgs(user: &str, offsets: &[i64]) -> Vec<Message> {
        offsets.iter().map(|o| Message::new(ts(*o), user)).collect()
    }

    #[tokio::test]
    async fn test_follows_cursor_until_exhausted() {
        let api = ScriptedChatApi::new()
            .history_page("C1", msgs("U1", &[10, 20]))
            .history_page("C1", msgs("U2", &[30]))
            .history_page("C1", msgs("U3", &[40, 50]));
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());

        let messages = fetcher.fetch("C1", &window()).await;
        assert_eq!(messages.len(), 5);
        assert_eq!(api.call_count("conversations.history"), 3);
        assert_eq!(messages[2].user.as_deref(), Some("U2"));
    }

    #[tokio::test]
    async fn test_error_on_third_page_keeps_first_two() {
        let api = ScriptedChatApi::new()
            .history_page("C1", msgs("U1", &[10, 20]))
            .history_page("C1", msgs("U2", &[30]))
            .history_error("C1", "ratelimited")
            .history_page("C1", msgs("U4", &[60]));
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());

        let messages = fetcher.fetch("C1", &window()).await;
        let users: Vec<_> = messages.iter().filter_map(|m| m.user.as_deref()).collect();
        assert_eq!(users, vec!["U1", "U1", "U2"]);
        // The failed page is not retried and nothing after it is requested.
        assert_eq!(api.call_count("conversations.history"), 3);
    }

    #[tokio::test]
    async fn test_error_on_first_page_yields_empty() {
        let api = ScriptedChatApi::new().history_error("C1", "not_in_channel");
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());
        assert!(fetcher.fetch("C1", &window()).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_page_stops() {
        let api = ScriptedChatApi::new()
            .history_page("C1", Vec::new())
            .history_page("C1", msgs("U1", &[10]));
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());
        assert!(fetcher.fetch("C1", &window()).await.is_empty());
        assert_eq!(api.call_count("conversations.history"), 1);
    }

    #[tokio::test]
    async fn test_thread_replies_inserted_after_parent() {
        let parent = Message::new(ts(100), "U1").with_thread(3);
        let parent_ts = parent.ts.clone();
        let api = ScriptedChatApi::new()
            .history_page("C1", vec![parent.clone(), Message::new(ts(200), "U9")])
            .replies(
                "C1",
                &parent_ts,
                vec![
                    parent.clone(),
                    Message::new(ts(110), "U2").in_thread(&parent_ts),
                    Message::new(ts(120), "U3")
                        .in_thread(&parent_ts)
                        .with_subtype("thread_broadcast"),
                    // Outside the window.
                    Message::new(ts(8 * 86_400), "U4").in_thread(&parent_ts),
                ],
            );
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());

        let messages = fetcher.fetch("C1", &window()).await;
        let users: Vec<_> = messages.iter().filter_map(|m| m.user.as_deref()).collect();
        assert_eq!(users, vec!["U1", "U2", "U9"]);
        assert!(messages[1].is_reply());
    }

    #[tokio::test]
    async fn test_threads_skipped_when_disabled() {
        let parent = Message::new(ts(100), "U1").with_thread(2);
        let api = ScriptedChatApi::new().history_page("C1", vec![parent]);
        let options = FetchOptions {
            include_threads: false,
            ..FetchOptions::immediate()
        };
        let fetcher = MessageFetcher::new(&api, options);

        assert_eq!(fetcher.fetch("C1", &window()).await.len(), 1);
        assert_eq!(api.call_count("conversations.replies"), 0);
    }

    #[tokio::test]
    async fn test_failed_thread_does_not_stop_history() {
        let parent = Message::new(ts(100), "U1").with_thread(2);
        let parent_ts = parent.ts.clone();
        let api = ScriptedChatApi::new()
            .history_page("C1", vec![parent])
            .history_page("C1", msgs("U2", &[300]))
            .replies_error("C1", &parent_ts, "ratelimited");
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());

        let messages = fetcher.fetch("C1", &window()).await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_reply_limit_respected() {
        let parent = Message::new(ts(100), "U1").with_thread(5);
        let parent_ts = parent.ts.clone();
        let replies: Vec<Message> = (1..=5)
            .map(|i| Message::new(ts(100 + i), "U2").in_thread(&parent_ts))
            .collect();
        let api = ScriptedChatApi::new()
            .history_page("C1", vec![parent])
            .replies("C1", &parent_ts, replies);
        let options = FetchOptions {
            reply_limit: 2,
            ..FetchOptions::immediate()
        };
        let fetcher = MessageFetcher::new(&api, options);

        assert_eq!(fetcher.fetch("C1", &window()).await.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_channels_in_order() {
        let api = ScriptedChatApi::new()
            .history_page("C1", msgs("U1", &[10]))
            .history_error("C2", "channel_not_found")
            .history_page("C3", msgs("U3", &[10, 20]));
        let fetcher = MessageFetcher::new(&api, FetchOptions::immediate());

        let channels = vec!["C1".to_string(), "C2".to_string(), "C3".to_string()];
        let histories = fetcher.fetch_channels(&channels, &window()).await;
        let counts: Vec<_> = histories
            .iter()
            .map(|h| (h.channel_id.as_str(), h.messages.len()))
            .collect();
        assert_eq!(counts, vec![("C1", 1), ("C2", 0), ("C3", 2)]);
    }
}
