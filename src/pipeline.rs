//! Fetch, aggregate, render, and deliver: one report run end to end.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use pulse_analytics::aggregations::rank_channels;
use pulse_analytics::{ChannelActivity, ReportData, ReportGenerator, UserActivity};
use pulse_core::config::{AppConfig, JobKind};
use pulse_core::error::PulseError;
use pulse_core::names::NameBook;
use pulse_core::provider::ChatApi;
use pulse_core::scheduler::Scheduler;
use pulse_core::types::Message;
use pulse_core::window::{offset_from_hours, LookbackWindow};
use pulse_slack::delivery::{deliver_direct_message, deliver_report_file, DeliveryTarget};
use pulse_slack::{ChannelDirectory, FetchOptions, MessageFetcher, SlackApi, SlackNameResolver};
use tracing::{error, info, warn};

/// Channels requested per `conversations.list` page.
pub const CHANNEL_PAGE_SIZE: u32 = 200;

/// The text written by a run and whether it is a real report.
#[derive(Debug, Clone)]
pub struct ReportRun {
    pub text: String,
    /// Set when the fallback artifact was written instead of a report.
    pub error: Option<String>,
}

/// Build the report text for the window ending at `now`.
///
/// User rankings cover `report.source_channels`, or the found target
/// channels when no source is configured. Channel activity covers the
/// target channels. A channel used for both is fetched once.
pub async fn build_report(
    api: &dyn ChatApi,
    config: &AppConfig,
    options: FetchOptions,
    now: DateTime<Utc>,
) -> pulse_core::Result<String> {
    let report = &config.report;
    if report.source_channels.is_empty() && report.target_channels.is_empty() {
        return Err(PulseError::Config(
            "no channels configured: set CHANNELS_ID or TARGET_CHANNELS".into(),
        ));
    }
    if report.rank_size == 0 {
        return Err(PulseError::Config(
            "report.rank_size must be at least 1 (RANK_NUMBER)".into(),
        ));
    }

    let window = LookbackWindow::trailing(now, report.lookback_days);
    let resolver = SlackNameResolver::new(api);

    let targets = if report.target_channels.is_empty() {
        None
    } else {
        let directory = ChannelDirectory::new(api, CHANNEL_PAGE_SIZE, options.page_delay);
        let targets = directory.resolve_targets(&report.target_channels).await;
        resolver.remember_channels(&targets.found);
        Some(targets)
    };

    let user_channels: Vec<String> = if report.source_channels.is_empty() {
        targets.as_ref().map(|t| t.ids()).unwrap_or_default()
    } else {
        dedup(&report.source_channels)
    };
    let mut wanted = user_channels.clone();
    if let Some(targets) = &targets {
        wanted.extend(targets.ids());
    }
    let wanted = dedup(&wanted);

    info!(
        "Analysing {} channel(s) over the last {} day(s)",
        wanted.len(),
        report.lookback_days
    );
    let fetcher = MessageFetcher::new(api, options);
    let histories: HashMap<String, Vec<Message>> = fetcher
        .fetch_channels(&wanted, &window)
        .await
        .into_iter()
        .map(|h| (h.channel_id, h.messages))
        .collect();

    let messages: Vec<Message> = user_channels
        .iter()
        .filter_map(|id| histories.get(id))
        .flatten()
        .cloned()
        .collect();
    info!("Fetched {} message(s) for user rankings", messages.len());

    let excluded = if report.exclude_bots {
        let self_id = match api.auth_identity().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not identify the credential's own user: {}", e);
                None
            }
        };
        resolver.bot_authors(&messages, self_id.as_deref()).await
    } else {
        HashSet::new()
    };
    let users = UserActivity::from_messages(&messages, |author| excluded.contains(author));

    let channels = targets.as_ref().map(|targets| {
        rank_channels(
            targets
                .found
                .iter()
                .map(|c| {
                    let history = histories.get(&c.id).map(Vec::as_slice).unwrap_or(&[]);
                    ChannelActivity::from_messages(&c.id, history)
                })
                .collect(),
        )
    });

    let n = report.rank_size;
    let ranked_users: Vec<&str> = [&users.posts, &users.reactions_given, &users.reactions_received]
        .into_iter()
        .flat_map(|tally| tally.top(n))
        .map(|(id, _)| id)
        .collect();
    let mut ranked_channels: Vec<&str> = user_channels.iter().map(String::as_str).collect();
    if let Some(channels) = &channels {
        ranked_channels.extend(channels.iter().take(n).map(|c| c.channel_id.as_str()));
    }
    let names = NameBook::resolve(&resolver, ranked_users, ranked_channels).await;

    let data = ReportData {
        window,
        generated_at: now,
        offset: offset_from_hours(report.utc_offset_hours),
        source_channels: user_channels.clone(),
        message_count: messages.len(),
        users,
        channels,
        missing_channels: targets.map(|t| t.missing).unwrap_or_default(),
        rank_size: n,
    };
    Ok(ReportGenerator::render(&data, &names))
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Build the report and write it to `output`. A failed build writes the
/// fallback artifact instead; only file errors are returned.
pub async fn write_report(
    api: &dyn ChatApi,
    config: &AppConfig,
    options: FetchOptions,
    output: &Path,
    now: DateTime<Utc>,
) -> Result<ReportRun> {
    match build_report(api, config, options, now).await {
        Ok(text) => {
            write_artifact(output, &text)?;
            info!("Report written to {}", output.display());
            Ok(ReportRun { text, error: None })
        }
        Err(e) => write_failure(config, output, now, &e),
    }
}

/// Write the "could not complete" artifact for `error`.
pub fn write_failure(
    config: &AppConfig,
    output: &Path,
    now: DateTime<Utc>,
    error: &PulseError,
) -> Result<ReportRun> {
    error!("Report generation failed: {}", error);
    let window = LookbackWindow::trailing(now, config.report.lookback_days);
    let offset = offset_from_hours(config.report.utc_offset_hours);
    let message = error.to_string();
    let text = ReportGenerator::failure_report(&window, now, offset, &message);
    write_artifact(output, &text)?;
    Ok(ReportRun {
        text,
        error: Some(message),
    })
}

fn write_artifact(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// Generate the report against Slack and write it to `output`.
pub async fn generate(config: &AppConfig, output: &Path) -> Result<ReportRun> {
    generate_with(config, output, |token| SlackApi::new(token, &config.slack)).await
}

/// Generate the report with a client built by `connect`. A missing token
/// writes the fallback artifact without connecting.
pub async fn generate_with<A, F>(config: &AppConfig, output: &Path, connect: F) -> Result<ReportRun>
where
    A: ChatApi,
    F: FnOnce(&str) -> pulse_core::Result<A>,
{
    let now = Utc::now();
    match config.require_token().and_then(connect) {
        Ok(api) => write_report(&api, config, FetchOptions::from_config(config), output, now).await,
        Err(e) => write_failure(config, output, now, &e),
    }
}

/// Run one job kind against Slack.
pub async fn run_job(config: &AppConfig, kind: JobKind) -> Result<()> {
    run_job_with(config, kind, |token| SlackApi::new(token, &config.slack)).await
}

/// Run one job kind with clients built by `connect`. An incomplete report
/// counts as a failed job. Delivery settings are checked before anything is
/// fetched or written.
pub async fn run_job_with<A, F>(config: &AppConfig, kind: JobKind, connect: F) -> Result<()>
where
    A: ChatApi,
    F: Fn(&str) -> pulse_core::Result<A>,
{
    let output = config.report.output_path.as_path();
    match kind {
        JobKind::Report => {
            let run = generate_with(config, output, &connect).await?;
            if let Some(e) = run.error {
                anyhow::bail!("report incomplete: {}", e);
            }
        }
        JobKind::SendDm => {
            DeliveryTarget::direct_message(config)?;
            let run = generate_with(config, output, &connect).await?;
            deliver_direct_message(config, &run.text, &connect).await?;
            if let Some(e) = run.error {
                anyhow::bail!("sent the fallback report: {}", e);
            }
        }
        JobKind::PostReport => {
            deliver_report_file(config, output, &connect).await?;
        }
    }
    Ok(())
}

/// Run configured cron jobs forever, one at a time.
pub async fn run_schedule(config: &AppConfig) -> Result<()> {
    let state_path = AppConfig::data_dir().join("schedule_state.json");
    let offset = offset_from_hours(config.report.utc_offset_hours);
    let mut scheduler = Scheduler::new(config.schedules.clone(), offset, state_path);
    if let Err(e) = scheduler.load_state() {
        warn!("Could not load schedule state: {}", e);
    }
    if scheduler.active_count() == 0 {
        anyhow::bail!("no enabled schedules with a valid cron expression in config");
    }
    info!("Scheduler running {} schedule(s)", scheduler.active_count());

    loop {
        for job in scheduler.tick() {
            info!("Running scheduled job '{}' ({:?})", job.schedule_name, job.kind);
            let result = run_job(config, job.kind).await;
            if let Err(e) = &result {
                error!("Scheduled job '{}' failed: {:#}", job.schedule_name, e);
            }
            scheduler.record_result(&job.schedule_name, result.err().map(|e| format!("{:#}", e)));
            if let Err(e) = scheduler.save_state() {
                warn!("Could not save schedule state: {}", e);
            }
        }
        tokio::time::sleep(scheduler.time_until_next_fire()).await;
    }
}
