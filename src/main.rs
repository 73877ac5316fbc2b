mod pipeline;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pulse_core::config::{AppConfig, JobKind};
use pulse_slack::resolver::find_users;
use pulse_slack::{ChannelDirectory, SlackApi};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "slack-pulse",
    about = "Weekly Slack activity reports: fetch, rank, and deliver",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/slack-pulse/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the report, write it to disk, and print it
    Report {
        /// Where to write the report
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Lookback window in days
        #[arg(long)]
        days: Option<u32>,
        /// Entries per ranked section
        #[arg(long)]
        top: Option<usize>,
    },

    /// Generate the report and send it as a direct message
    SendDm,

    /// Post a previously generated report to the report channel
    PostReport {
        /// Report file to post
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show which target channels exist
    Channels,

    /// Find user ids by name fragment
    FindUser {
        /// Part of a real name, display name, or handle
        query: String,
    },

    /// Run the configured cron schedules
    Schedule,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "slack_pulse=info,pulse_slack=info,warn".into()),
        )
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config, then let the environment override it.
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_process_env();

    match cli.command {
        Commands::Report { output, days, top } => {
            if let Some(path) = output {
                config.report.output_path = path;
            }
            if let Some(days) = days {
                config.report.lookback_days = days;
            }
            if let Some(top) = top {
                config.report.rank_size = top;
            }
            let run = pipeline::generate(&config, &config.report.output_path).await?;
            println!("{}", run.text);
            if let Some(e) = run.error {
                anyhow::bail!("report incomplete: {}", e);
            }
        }
        Commands::SendDm => {
            pipeline::run_job(&config, JobKind::SendDm).await?;
        }
        Commands::PostReport { file } => {
            if let Some(path) = file {
                config.report.output_path = path;
            }
            pipeline::run_job(&config, JobKind::PostReport).await?;
        }
        Commands::Channels => {
            let api = SlackApi::from_config(&config)?;
            let directory = ChannelDirectory::new(
                &api,
                pipeline::CHANNEL_PAGE_SIZE,
                Duration::from_millis(config.fetch.page_delay_ms),
            );
            if config.report.target_channels.is_empty() {
                for channel in directory.list_all().await {
                    println!("{}\t#{}", channel.id, channel.name);
                }
            } else {
                let targets = directory.resolve_targets(&config.report.target_channels).await;
                for channel in &targets.found {
                    println!("{}\t#{}", channel.id, channel.name);
                }
                for name in &targets.missing {
                    println!("-\t{} (not found)", name);
                }
            }
        }
        Commands::FindUser { query } => {
            let api = SlackApi::from_config(&config)?;
            let users = find_users(&api, &query).await?;
            if users.is_empty() {
                println!("No users match '{}'", query);
            }
            for user in users {
                println!("{}\t{}\t@{}", user.id, user.display_label(), user.name);
            }
        }
        Commands::Schedule => {
            pipeline::run_schedule(&config).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, &config)?;
        }
    }

    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let mut shown = config.clone();
            for token in [&mut shown.slack.token, &mut shown.delivery.token] {
                if token.is_some() {
                    *token = Some("********".into());
                }
            }
            let toml_str = toml::to_string_pretty(&shown)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
