//! Showtime labels: the `H:MM AM/PM` pattern shared by the extractor and the dedup engine.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;

/// `H:MM AM/PM`, case-insensitive, optional space before the meridiem.
static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s?([AP]M)\b").expect("time pattern is valid")
});

/// A parsed 12-hour clock time as it appears on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockTime {
    hour: u32,
    minute: u32,
    pm: bool,
}

impl ClockTime {
    fn from_captures(caps: &regex::Captures<'_>) -> Option<Self> {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        if !(1..=12).contains(&hour) || minute > 59 {
            return None;
        }
        let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("pm");
        Some(Self { hour, minute, pm })
    }

    fn canonical(&self) -> String {
        format!("{}:{:02} {}", self.hour, self.minute, if self.pm { "PM" } else { "AM" })
    }

    fn to_naive(self) -> Option<NaiveTime> {
        let hour24 = match (self.hour, self.pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        NaiveTime::from_hms_opt(hour24, self.minute, 0)
    }
}

/// Every time-of-day substring in `text`, in order of appearance.
pub fn find_all(text: &str) -> Vec<String> {
    TIME_PATTERN
        .captures_iter(text)
        .filter(|caps| ClockTime::from_captures(caps).is_some())
        .filter_map(|caps| caps.get(0).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// True when `text` contains at least one valid time-of-day.
pub fn contains_time(text: &str) -> bool {
    TIME_PATTERN
        .captures_iter(text)
        .any(|caps| ClockTime::from_captures(&caps).is_some())
}

/// Reduce a label to its canonical `H:MM AM/PM` form.
///
/// Returns `None` when the label carries no valid time-of-day.
pub fn canonicalize(label: &str) -> Option<String> {
    TIME_PATTERN
        .captures_iter(label)
        .find_map(|caps| ClockTime::from_captures(&caps))
        .map(|t| t.canonical())
}

/// Time-of-day of a label, for window filtering and chronological ordering.
pub fn time_of_day(label: &str) -> Option<NaiveTime> {
    TIME_PATTERN
        .captures_iter(label)
        .find_map(|caps| ClockTime::from_captures(&caps))
        .and_then(ClockTime::to_naive)
}

/// Sort labels chronologically; labels without a time sort last, lexically.
pub fn sort_chronologically(labels: &mut [String]) {
    labels.sort_by(|a, b| match (time_of_day(a), time_of_day(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}
