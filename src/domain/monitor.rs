use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{DateMode, TimeWindow};
use super::venue::VenueFilter;
use crate::constants::{DEFAULT_HEARTBEAT_MINUTES, DEFAULT_POLL_INTERVAL_MINUTES, MIN_POLL_INTERVAL_SECS};
use crate::error::{Result, WatchError};

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorState {
    Running,
    Paused,
    Stopping,
    Stopped,
    Discover,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Running => "RUNNING",
            MonitorState::Paused => "PAUSED",
            MonitorState::Stopping => "STOPPING",
            MonitorState::Stopped => "STOPPED",
            MonitorState::Discover => "DISCOVER",
        }
    }

    /// States the scheduler polls.
    pub fn is_pollable(&self) -> bool {
        matches!(self, MonitorState::Running | MonitorState::Discover)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorState {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(MonitorState::Running),
            "PAUSED" => Ok(MonitorState::Paused),
            "STOPPING" => Ok(MonitorState::Stopping),
            "STOPPED" => Ok(MonitorState::Stopped),
            "DISCOVER" => Ok(MonitorState::Discover),
            other => Err(WatchError::InvalidMonitor(format!("unknown state '{}'", other))),
        }
    }
}

/// A persisted watch on one event page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub url: String,
    pub date_mode: DateMode,
    pub venues: VenueFilter,
    pub interval_secs: i64,
    pub window: Option<TimeWindow>,
    pub state: MonitorState,
    pub snooze_until: Option<DateTime<Utc>>,
    /// Zero disables heartbeats for this monitor.
    pub heartbeat_secs: i64,
    pub baseline: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_alert: Option<DateTime<Utc>>,
    pub notify_target: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// A RUNNING monitor with default interval and heartbeat, baseline off.
    pub fn new(id: impl Into<String>, url: impl Into<String>, date_mode: DateMode, venues: VenueFilter) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: url.into(),
            date_mode,
            venues,
            interval_secs: DEFAULT_POLL_INTERVAL_MINUTES * 60,
            window: None,
            state: MonitorState::Running,
            snooze_until: None,
            heartbeat_secs: DEFAULT_HEARTBEAT_MINUTES * 60,
            baseline: false,
            last_run: None,
            last_alert: None,
            notify_target: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check creation-time invariants against the local `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(WatchError::InvalidMonitor("monitor id is empty".to_string()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(WatchError::InvalidMonitor(format!(
                "monitor {} url must be http(s): {}",
                self.id, self.url
            )));
        }
        if self.interval_secs < MIN_POLL_INTERVAL_SECS {
            return Err(WatchError::InvalidMonitor(format!(
                "monitor {} interval {}s is below the {}s floor",
                self.id, self.interval_secs, MIN_POLL_INTERVAL_SECS
            )));
        }
        if self.heartbeat_secs < 0 {
            return Err(WatchError::InvalidMonitor(format!(
                "monitor {} heartbeat interval is negative",
                self.id
            )));
        }
        self.date_mode.validate(today)
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.map_or(false, |until| now < until)
    }

    pub fn in_window(&self, local_time: NaiveTime) -> bool {
        self.window.map_or(true, |w| w.contains(local_time))
    }

    /// DISCOVER always runs; otherwise the interval must have elapsed since the last run.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.state == MonitorState::Discover {
            return true;
        }
        match self.last_run {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }

    /// Time until the next scheduled poll, zero when already due.
    pub fn next_poll_in(&self, now: DateTime<Utc>) -> Duration {
        match self.last_run {
            Some(last) if self.state != MonitorState::Discover => {
                let remaining = self.interval() - (now - last);
                remaining.max(Duration::zero())
            }
            _ => Duration::zero(),
        }
    }

    pub fn effective_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        self.date_mode.effective_dates(today)
    }
}
