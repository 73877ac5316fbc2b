use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{JobKind, ScheduleConfig};
use crate::error::{PulseError, Result};

/// A job that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub schedule_name: String,
    pub kind: JobKind,
}

/// Persistent state for a single schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub last_error: Option<String>,
}

/// Cron scheduler for report jobs.
///
/// The caller drives it: `tick()` returns whatever is due, the caller runs
/// those jobs one after another, then sleeps for `time_until_next_fire()`.
/// State is persisted to disk so a missed schedule fires on restart.
/// Cron fields are read as wall-clock time in `offset`.
pub struct Scheduler {
    schedules: Vec<ScheduleConfig>,
    offset: FixedOffset,
    parsed: Vec<Option<Schedule>>,
    state: HashMap<String, ScheduleState>,
    state_path: PathBuf,
}

impl Scheduler {
    /// Invalid cron expressions are logged and skipped.
    pub fn new(schedules: Vec<ScheduleConfig>, offset: FixedOffset, state_path: PathBuf) -> Self {
        let now = Utc::now();
        let mut parsed = Vec::new();
        let mut state = HashMap::new();

        for config in &schedules {
            match parse_cron_expr(&config.cron) {
                Ok(schedule) => {
                    let next_run = next_fire(&schedule, offset)
                        .unwrap_or(now + chrono::Duration::hours(24));
                    state.insert(
                        config.name.clone(),
                        ScheduleState {
                            last_run: None,
                            next_run,
                            run_count: 0,
                            last_error: None,
                        },
                    );
                    parsed.push(Some(schedule));
                }
                Err(e) => {
                    warn!("Invalid cron expression for '{}': {}", config.name, e);
                    parsed.push(None);
                }
            }
        }

        Self {
            schedules,
            offset,
            parsed,
            state,
            state_path,
        }
    }

    /// Merge persisted state for schedules that still exist in the config.
    /// Past `next_run` values are kept so missed runs fire on the next tick.
    pub fn load_state(&mut self) -> Result<()> {
        if !self.state_path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&self.state_path)?;
        let loaded: HashMap<String, ScheduleState> = serde_json::from_str(&contents)?;

        for (name, loaded_state) in loaded {
            if let Some(current) = self.state.get_mut(&name) {
                current.last_run = loaded_state.last_run;
                current.run_count = loaded_state.run_count;
                current.last_error = loaded_state.last_error;
                current.next_run = loaded_state.next_run;
            }
        }
        Ok(())
    }

    pub fn save_state(&self) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_path, contents)?;
        Ok(())
    }

    /// Return the jobs that are due and advance their next fire time.
    pub fn tick(&mut self) -> Vec<ScheduledJob> {
        let now = Utc::now();
        let offset = self.offset;
        let mut jobs = Vec::new();

        for (i, config) in self.schedules.iter().enumerate() {
            if !config.enabled {
                continue;
            }
            let Some(parsed) = &self.parsed[i] else {
                continue;
            };
            let Some(state) = self.state.get_mut(&config.name) else {
                continue;
            };

            if now >= state.next_run {
                debug!("Firing schedule: {}", config.name);
                jobs.push(ScheduledJob {
                    schedule_name: config.name.clone(),
                    kind: config.job,
                });

                state.last_run = Some(now);
                state.run_count += 1;
                state.last_error = None;
                if let Some(next) = next_fire(parsed, offset) {
                    state.next_run = next;
                }
            }
        }

        jobs
    }

    /// Record the outcome of a job run.
    pub fn record_result(&mut self, schedule_name: &str, error: Option<String>) {
        if let Some(state) = self.state.get_mut(schedule_name) {
            state.last_error = error;
        }
    }

    pub fn time_until_next_fire(&self) -> std::time::Duration {
        let now = Utc::now();

        let earliest = self
            .schedules
            .iter()
            .enumerate()
            .filter(|(i, config)| config.enabled && self.parsed[*i].is_some())
            .filter_map(|(_, config)| self.state.get(&config.name))
            .map(|state| state.next_run)
            .min();

        match earliest {
            Some(next) if next > now => (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60)),
            Some(_) => std::time::Duration::from_millis(0),
            None => std::time::Duration::from_secs(3600),
        }
    }

    pub fn active_count(&self) -> usize {
        self.schedules
            .iter()
            .zip(self.parsed.iter())
            .filter(|(s, p)| s.enabled && p.is_some())
            .count()
    }

    pub fn state(&self) -> &HashMap<String, ScheduleState> {
        &self.state
    }
}

/// The next fire time after now, evaluating the cron fields in `offset`.
pub fn next_fire(schedule: &Schedule, offset: FixedOffset) -> Option<DateTime<Utc>> {
    schedule
        .upcoming(offset)
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// Parse a cron expression, normalizing 5-field standard cron to the
/// 7-field `sec min hour dom month dow year` form the `cron` crate expects.
pub fn parse_cron_expr(expr: &str) -> Result<Schedule> {
    let normalized = normalize_cron_fields(expr);
    Schedule::from_str(&normalized)
        .map_err(|e| PulseError::Config(format!("Invalid cron expression '{}': {}", expr, e)))
}

fn normalize_cron_fields(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => format!("0 {} *", expr),
        6 => format!("0 {}", expr),
        _ => expr.to_string(),
    }
}
