//! The closed `[start, end]` interval a run analyses.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};
use crate::types::parse_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl LookbackWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(PulseError::InvalidWindow(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// The trailing `days` ending at `now`.
    pub fn trailing(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now - Duration::days(days as i64),
            end: now,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `oldest` bound as whole epoch seconds, the form the history API takes.
    pub fn oldest_param(&self) -> String {
        self.start.timestamp().to_string()
    }

    /// `latest` bound as whole epoch seconds.
    pub fn latest_param(&self) -> String {
        self.end.timestamp().to_string()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    /// Unparsable timestamps are treated as outside the window.
    pub fn contains_ts(&self, ts: &str) -> bool {
        parse_ts(ts).is_some_and(|at| self.contains(at))
    }

    /// Render both bounds as dates in the given offset.
    pub fn date_range(&self, offset: FixedOffset) -> (String, String) {
        (
            self.start.with_timezone(&offset).format("%Y-%m-%d").to_string(),
            self.end.with_timezone(&offset).format("%Y-%m-%d").to_string(),
        )
    }
}

/// Build a fixed offset from whole hours east of UTC, clamped to the valid range.
pub fn offset_from_hours(hours: i32) -> FixedOffset {
    let secs = hours.clamp(-23, 23) * 3600;
    FixedOffset::east_opt(secs).unwrap_or(Utc.fix())
}
