//! Message texts and buttons for each notification kind.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use super::{Action, Notification, NotificationKind};
use crate::constants::QUICK_SNOOZE_HOURS;
use crate::domain::{Finding, Monitor, MonitorState};
use crate::links::{deeplink, titled};
use crate::showtime;

fn notification(monitor: &Monitor, kind: NotificationKind, text: String, actions: Vec<Vec<Action>>) -> Notification {
    Notification {
        monitor_id: monitor.id.clone(),
        target: monitor.notify_target.clone(),
        kind,
        text: titled(&monitor.url, &text),
        actions,
    }
}

fn pretty_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn interval_label(monitor: &Monitor) -> String {
    let secs = monitor.interval().num_seconds();
    if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// One grouped message for every finding of a poll: by date, then venue, times in clock order.
pub fn new_shows(monitor: &Monitor, findings: &[Finding]) -> Notification {
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<&str, Vec<String>>> = BTreeMap::new();
    for f in findings {
        by_date
            .entry(f.date)
            .or_default()
            .entry(f.venue.as_str())
            .or_default()
            .push(f.showtime.clone());
    }

    let first_date = by_date.keys().next().copied();
    let link = first_date.map(|d| deeplink(&monitor.url, d)).unwrap_or_else(|| monitor.url.clone());

    let mut lines = vec![
        "🎟️ New shows".to_string(),
        format!("🔎 Monitor: {} • every {}", monitor.id, interval_label(monitor)),
        format!("🔗 {}", link),
        String::new(),
    ];
    let mut venue_entries = 0;
    for (date, venues) in &by_date {
        lines.push(format!("🗓 {}", pretty_date(*date)));
        for (venue, times) in venues {
            let mut times = times.clone();
            showtime::sort_chronologically(&mut times);
            times.dedup();
            lines.push(format!("  • 🏟 {}: {}", venue, times.join(", ")));
            venue_entries += 1;
        }
        lines.push(String::new());
    }
    let body = lines.join("\n");
    let text = format!(
        "{}\nTotals: {} time(s) • {} venue entries • {} date(s)",
        body.trim_end(),
        findings.len(),
        venue_entries,
        by_date.len()
    );

    let running = monitor.state == MonitorState::Running;
    let actions = vec![
        vec![Action::url("Open Buy Page", link)],
        vec![
            Action::callback("Status", format!("status|{}", monitor.id)),
            Action::callback(
                format!("Snooze {}h", QUICK_SNOOZE_HOURS),
                format!("snooze|{}|{}h", monitor.id, QUICK_SNOOZE_HOURS),
            ),
        ],
        vec![
            if running {
                Action::callback("Pause", format!("pause|{}", monitor.id))
            } else {
                Action::callback("Resume", format!("resume|{}", monitor.id))
            },
            Action::callback("Edit Venues", format!("edit_venues|{}", monitor.id)),
        ],
    ];
    notification(monitor, NotificationKind::NewShows, text, actions)
}

/// Periodic health ping, independent of whether polls run or succeed.
pub fn heartbeat(monitor: &Monitor, first_date: NaiveDate, now: DateTime<Utc>) -> Notification {
    let eta = monitor.next_poll_in(now).num_seconds().max(0);
    let mut lines = vec![
        format!("💓 Heartbeat [{}]", monitor.id),
        format!(
            "State: {} • every {} • Venues: {}",
            monitor.state,
            interval_label(monitor),
            monitor.venues.describe()
        ),
        format!("Dates: {}", monitor.date_mode.describe()),
    ];
    if let Some(window) = &monitor.window {
        lines.push(format!("Window: {}", window.describe()));
    }
    if let Some(until) = monitor.snooze_until.filter(|u| *u > now) {
        let mins = (until - now).num_minutes();
        lines.push(format!("Snoozed for another {}m", mins));
    }
    lines.push(format!("Next run in ~ {}m {}s", eta / 60, eta % 60));
    lines.push(format!("🔗 {}", deeplink(&monitor.url, first_date)));
    notification(monitor, NotificationKind::Heartbeat, lines.join("\n"), Vec::new())
}

pub fn discovery(monitor: &Monitor, date: NaiveDate, venues: &[String]) -> Notification {
    let link = deeplink(&monitor.url, date);
    let text = format!(
        "🧭 Discover complete for [{}]\nCaptured {} venue(s) for {}\nState set to PAUSED.\n🔗 {}",
        monitor.id,
        venues.len(),
        pretty_date(date),
        link
    );
    notification(monitor, NotificationKind::Discovery, text, vec![vec![Action::url("Open Page", link)]])
}

pub fn auto_paused(monitor: &Monitor) -> Notification {
    let text = format!("⏸️ [{}] End date reached; auto-paused.", monitor.id);
    notification(monitor, NotificationKind::AutoPaused, text, Vec::new())
}

pub fn stopped(monitor: &Monitor) -> Notification {
    let text = format!("⏹️ [{}] Monitor stopped.", monitor.id);
    notification(monitor, NotificationKind::Stopped, text, Vec::new())
}

pub fn error(monitor: &Monitor, message: &str) -> Notification {
    let text = format!("⚠️ Error on [{}]: {}", monitor.id, message);
    notification(monitor, NotificationKind::Error, text, Vec::new())
}
