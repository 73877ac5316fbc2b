//! Plain-text activity report rendering.
//!
//! Output uses Slack mrkdwn emphasis so the same text reads well as a file
//! and as a posted message.

use crate::aggregations::{ChannelActivity, Tally, UserActivity};
use chrono::{DateTime, FixedOffset, Utc};
use pulse_core::names::NameBook;
use pulse_core::window::LookbackWindow;

const NO_DATA: &str = "  (no data)\n";

/// Everything a report needs, already aggregated.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub window: LookbackWindow,
    pub generated_at: DateTime<Utc>,
    /// Offset used for every rendered date.
    pub offset: FixedOffset,
    /// Channel ids the user sections were computed over.
    pub source_channels: Vec<String>,
    pub message_count: usize,
    pub users: UserActivity,
    /// Ranked channel activity; `None` outside multi-channel runs.
    pub channels: Option<Vec<ChannelActivity>>,
    /// Configured target channel names that do not exist.
    pub missing_channels: Vec<String>,
    pub rank_size: usize,
}

/// Report generator for the activity summary.
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn render(data: &ReportData, names: &NameBook) -> String {
        let mut report = header(&data.window, data.generated_at, data.offset);

        let sources: Vec<String> = data
            .source_channels
            .iter()
            .map(|id| format!("#{}", names.channel(id)))
            .collect();
        let sources = if sources.is_empty() {
            "(none)".to_string()
        } else {
            sources.join(", ")
        };
        report.push_str(&format!("📍 Source: {}\n", sources));
        report.push_str(&format!("💬 Messages analysed: {}\n", data.message_count));

        let n = data.rank_size;
        report.push_str(&format!("\n🏆 *Top {} posters*\n", n));
        push_ranking(&mut report, &data.users.posts, n, names, ("post", "posts"));

        report.push_str(&format!("\n👍 *Top {} reactions given*\n", n));
        push_ranking(&mut report, &data.users.reactions_given, n, names, ("reaction", "reactions"));

        report.push_str(&format!("\n💖 *Top {} reactions received*\n", n));
        push_ranking(&mut report, &data.users.reactions_received, n, names, ("reaction", "reactions"));

        if let Some(channels) = &data.channels {
            report.push_str("\n📣 *Channel activity*\n");
            if channels.is_empty() {
                report.push_str(NO_DATA);
            }
            for (i, activity) in channels.iter().take(n).enumerate() {
                report.push_str(&format!(
                    "  {}. #{} — {} (posts {} / replies {} / threads {})\n",
                    i + 1,
                    names.channel(&activity.channel_id),
                    activity.total(),
                    activity.posts,
                    activity.replies,
                    activity.thread_starts,
                ));
            }
        }

        if !data.missing_channels.is_empty() {
            report.push_str(&format!(
                "\n⚠️ Channels not found: {}\n",
                data.missing_channels.join(", ")
            ));
        }

        report
    }

    /// Fallback artifact written when a run cannot produce a report.
    pub fn failure_report(
        window: &LookbackWindow,
        generated_at: DateTime<Utc>,
        offset: FixedOffset,
        error: &str,
    ) -> String {
        let mut report = header(window, generated_at, offset);
        report.push_str("\n❌ The report could not be completed.\n");
        report.push_str(&format!("Reason: {}\n", error));
        report
    }
}

fn header(window: &LookbackWindow, generated_at: DateTime<Utc>, offset: FixedOffset) -> String {
    let (start, end) = window.date_range(offset);
    format!(
        "📊 *Slack Activity Report*\n📅 Period: {} ～ {}\n⏰ Generated: {}\n",
        start,
        end,
        generated_at.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
    )
}

fn push_ranking(
    report: &mut String,
    tally: &Tally,
    n: usize,
    names: &NameBook,
    (singular, plural): (&str, &str),
) {
    let top = tally.top(n);
    if top.is_empty() {
        report.push_str(NO_DATA);
        return;
    }
    for (i, (user, count)) in top.iter().enumerate() {
        let unit = if *count == 1 { singular } else { plural };
        report.push_str(&format!("  {}. {} — {} {}\n", i + 1, names.user(user), count, unit));
    }
}
