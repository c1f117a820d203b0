pub mod monitor;
pub mod schedule;
pub mod venue;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use monitor::{Monitor, MonitorState};
pub use schedule::{compact_date, parse_compact_date, DateMode, TimeWindow};
pub use venue::{normalize, VenueFilter};

/// A (monitor, date, venue, showtime) tuple that has already been reported or baselined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub monitor_id: String,
    pub date: NaiveDate,
    pub venue: String,
    pub showtime: String,
    pub first_seen: DateTime<Utc>,
}

/// A newly appeared showtime, ready to be reported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Finding {
    pub date: NaiveDate,
    pub venue: String,
    pub showtime: String,
}

/// A venue name observed on a monitor's page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedVenue {
    pub date: NaiveDate,
    pub venue: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Degraded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => RunStatus::Ok,
            "degraded" => RunStatus::Degraded,
            _ => RunStatus::Failed,
        }
    }
}

/// Bookkeeping row for one executed poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRun {
    pub monitor_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub error: Option<String>,
}
