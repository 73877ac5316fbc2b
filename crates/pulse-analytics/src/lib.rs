//! Activity aggregation and report rendering.
//!
//! Turns fetched messages into per-user and per-channel tallies and renders
//! them as a fixed-template text report.

pub mod aggregations;
pub mod reports;

pub use aggregations::{ChannelActivity, Tally, UserActivity};
pub use reports::{ReportData, ReportGenerator};
