use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_DATE_SPAN_DAYS;
use crate::error::{Result, WatchError};

/// Which show dates a monitor looks at.
///
/// Exactly one mode is active per monitor; the enum makes a second mode unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum DateMode {
    /// An explicit list of dates, independent of the current day.
    Fixed { dates: Vec<NaiveDate> },
    /// `days` consecutive days starting today.
    Rolling { days: u32 },
    /// Every day from today through `until`, inclusive.
    Until { until: NaiveDate },
}

impl DateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateMode::Fixed { .. } => "FIXED",
            DateMode::Rolling { .. } => "ROLLING",
            DateMode::Until { .. } => "UNTIL",
        }
    }

    /// Dates to poll when the current local day is `today`, at most `MAX_DATE_SPAN_DAYS`
    /// of them for ROLLING and UNTIL. Stops short at the end of the calendar.
    pub fn effective_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        match self {
            DateMode::Fixed { dates } => dates.clone(),
            DateMode::Rolling { days } => (0..(*days).clamp(1, MAX_DATE_SPAN_DAYS))
                .map_while(|offset| today.checked_add_days(Days::new(offset as u64)))
                .collect(),
            DateMode::Until { until } => {
                let mut out = Vec::new();
                let mut day = Some(today);
                while let Some(d) = day.filter(|d| d <= until && out.len() < MAX_DATE_SPAN_DAYS as usize) {
                    out.push(d);
                    day = d.succ_opt();
                }
                out
            }
        }
    }

    /// Short human description for status messages.
    pub fn describe(&self) -> String {
        match self {
            DateMode::Fixed { dates } => {
                let list: Vec<String> = dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect();
                format!("dates {}", list.join(", "))
            }
            DateMode::Rolling { days } => format!("rolling {} day(s)", days),
            DateMode::Until { until } => format!("until {}", until.format("%Y-%m-%d")),
        }
    }

    /// Reject modes that could never produce a date.
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        match self {
            DateMode::Fixed { dates } if dates.is_empty() => Err(WatchError::InvalidMonitor(
                "FIXED mode needs at least one date".to_string(),
            )),
            DateMode::Rolling { days } if *days == 0 => Err(WatchError::InvalidMonitor(
                "ROLLING mode needs at least one day".to_string(),
            )),
            DateMode::Rolling { days } if *days > MAX_DATE_SPAN_DAYS => Err(WatchError::InvalidMonitor(format!(
                "ROLLING mode spans {} days; the limit is {}",
                days, MAX_DATE_SPAN_DAYS
            ))),
            DateMode::Until { until } if *until < today => Err(WatchError::InvalidMonitor(format!(
                "UNTIL date {} is already in the past",
                until
            ))),
            DateMode::Until { until } if until.signed_duration_since(today).num_days() >= MAX_DATE_SPAN_DAYS as i64 => {
                Err(WatchError::InvalidMonitor(format!(
                    "UNTIL date {} is more than {} days away",
                    until, MAX_DATE_SPAN_DAYS
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A daily time-of-day window, inclusive on both ends.
///
/// When `start > end` the window wraps past midnight (e.g. 22:00–02:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `"HH:MM"` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| WatchError::InvalidMonitor(format!("bad window time '{}': {}", s, e)))
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        // Compare at minute granularity so 23:59 covers 23:59:30
        let t = NaiveTime::from_hms_opt(
            chrono::Timelike::hour(&time),
            chrono::Timelike::minute(&time),
            0,
        )
        .unwrap_or(time);
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }

    pub fn describe(&self) -> String {
        format!("{}–{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// `YYYYMMDD`, the date form used in page URLs and storage keys.
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Parse a date written with any separators (`2025-01-01`, `20250101`, `2025/01/01`).
pub fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn rolling_window_starts_today() {
        let today = day(2025, 12, 30);
        let dates = DateMode::Rolling { days: 3 }.effective_dates(today);
        assert_eq!(dates, vec![day(2025, 12, 30), day(2025, 12, 31), day(2026, 1, 1)]);
    }

    #[test]
    fn until_is_inclusive_and_empties_after_cutoff() {
        let today = day(2025, 1, 10);
        let mode = DateMode::Until { until: day(2025, 1, 12) };
        assert_eq!(mode.effective_dates(today), vec![day(2025, 1, 10), day(2025, 1, 11), day(2025, 1, 12)]);

        let yesterday = DateMode::Until { until: day(2025, 1, 9) };
        assert!(yesterday.effective_dates(today).is_empty());
    }

    #[test]
    fn fixed_ignores_current_day() {
        let dates = vec![day(2024, 1, 1), day(2030, 5, 5)];
        let mode = DateMode::Fixed { dates: dates.clone() };
        assert_eq!(mode.effective_dates(day(2025, 6, 1)), dates);
        assert_eq!(mode.effective_dates(day(2019, 6, 1)), dates);
    }

    #[test]
    fn validate_rejects_past_cutoff() {
        let today = day(2025, 1, 10);
        assert!(DateMode::Until { until: day(2025, 1, 9) }.validate(today).is_err());
        assert!(DateMode::Until { until: day(2025, 1, 10) }.validate(today).is_ok());
        assert!(DateMode::Fixed { dates: vec![] }.validate(today).is_err());
        assert!(DateMode::Rolling { days: 0 }.validate(today).is_err());
    }

    #[test]
    fn validate_caps_the_date_span() {
        let today = day(2025, 1, 10);
        assert!(DateMode::Rolling { days: MAX_DATE_SPAN_DAYS }.validate(today).is_ok());
        assert!(DateMode::Rolling { days: MAX_DATE_SPAN_DAYS + 1 }.validate(today).is_err());
        assert!(DateMode::Rolling { days: u32::MAX }.validate(today).is_err());

        let last = today.checked_add_days(Days::new(MAX_DATE_SPAN_DAYS as u64 - 1)).unwrap();
        assert!(DateMode::Until { until: last }.validate(today).is_ok());
        assert!(DateMode::Until { until: last.succ_opt().unwrap() }.validate(today).is_err());
        assert!(DateMode::Until { until: NaiveDate::MAX }.validate(today).is_err());
    }

    #[test]
    fn unvalidated_spans_never_overflow() {
        let today = day(2025, 1, 10);
        let far = DateMode::Until { until: NaiveDate::MAX }.effective_dates(today);
        assert_eq!(far.len(), MAX_DATE_SPAN_DAYS as usize);
        assert_eq!(far[0], today);

        let huge = DateMode::Rolling { days: u32::MAX }.effective_dates(today);
        assert_eq!(huge.len(), MAX_DATE_SPAN_DAYS as usize);

        let edge = DateMode::Rolling { days: 5 }.effective_dates(NaiveDate::MAX);
        assert_eq!(edge, vec![NaiveDate::MAX]);
        assert_eq!(DateMode::Until { until: NaiveDate::MAX }.effective_dates(NaiveDate::MAX), vec![NaiveDate::MAX]);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let night = TimeWindow::new(hm(0, 0), hm(6, 0));
        assert!(!night.contains(hm(23, 30)));
        assert!(night.contains(hm(6, 0)));

        let late = TimeWindow::new(hm(22, 0), hm(23, 59));
        assert!(late.contains(hm(23, 30)));
        assert!(late.contains(NaiveTime::from_hms_opt(23, 59, 40).unwrap()));
    }

    #[test]
    fn window_can_wrap_midnight() {
        let w = TimeWindow::new(hm(22, 0), hm(2, 0));
        assert!(w.contains(hm(23, 0)));
        assert!(w.contains(hm(1, 30)));
        assert!(!w.contains(hm(12, 0)));
    }

    #[test]
    fn compact_dates_round_trip_common_inputs() {
        assert_eq!(parse_compact_date("2025-01-02"), Some(day(2025, 1, 2)));
        assert_eq!(parse_compact_date("20250102"), Some(day(2025, 1, 2)));
        assert_eq!(parse_compact_date("1/2/2025"), None);
        assert_eq!(compact_date(day(2025, 1, 2)), "20250102");
    }
}
