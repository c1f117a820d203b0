use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::domain::{Monitor, MonitorState};
use crate::notify::{format, Notification};

/// When each monitor last sent a heartbeat. Lives on the scheduler, not in storage.
#[derive(Debug, Default)]
pub struct HeartbeatBook {
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl HeartbeatBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A heartbeat for `monitor` if one is due, recording it as sent.
    ///
    /// The first evaluation of a monitor is always due. Stopped monitors and a zero
    /// interval never produce one.
    pub fn due(&mut self, monitor: &Monitor, today: NaiveDate, now: DateTime<Utc>) -> Option<Notification> {
        if monitor.state == MonitorState::Stopped || monitor.heartbeat_secs <= 0 {
            return None;
        }
        let every = Duration::seconds(monitor.heartbeat_secs);
        let due = self
            .last_sent
            .get(&monitor.id)
            .map_or(true, |last| now - *last >= every);
        if !due {
            return None;
        }
        self.last_sent.insert(monitor.id.clone(), now);
        let first_date = monitor.effective_dates(today).first().copied().unwrap_or(today);
        Some(format::heartbeat(monitor, first_date, now))
    }

    /// Drop entries for monitors that no longer exist.
    pub fn retain(&mut self, live: &HashSet<&str>) {
        self.last_sent.retain(|id, _| live.contains(id.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateMode, VenueFilter};
    use chrono::TimeZone;

    fn monitor(state: MonitorState) -> Monitor {
        let mut m = Monitor::new("m1", "https://example.com/e", DateMode::Rolling { days: 1 }, VenueFilter::Any);
        m.state = state;
        m.heartbeat_secs = 600;
        m
    }

    #[test]
    fn first_heartbeat_is_immediate_then_spaced() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let today = t0.date_naive();
        let mut book = HeartbeatBook::new();
        let m = monitor(MonitorState::Paused);

        assert!(book.due(&m, today, t0).is_some());
        assert!(book.due(&m, today, t0 + Duration::seconds(599)).is_none());
        assert!(book.due(&m, today, t0 + Duration::seconds(600)).is_some());
    }

    #[test]
    fn stopped_and_disabled_monitors_are_silent() {
        let now = Utc::now();
        let mut book = HeartbeatBook::new();
        assert!(book.due(&monitor(MonitorState::Stopped), now.date_naive(), now).is_none());

        let mut quiet = monitor(MonitorState::Running);
        quiet.heartbeat_secs = 0;
        assert!(book.due(&quiet, now.date_naive(), now).is_none());
    }

    #[test]
    fn far_future_cutoff_does_not_panic() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut m = monitor(MonitorState::Running);
        m.date_mode = DateMode::Until { until: NaiveDate::MAX };
        let beat = HeartbeatBook::new().due(&m, now.date_naive(), now);
        assert!(beat.is_some());
    }
}
