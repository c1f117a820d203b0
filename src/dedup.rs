//! Dedup / diff engine.
//!
//! Snapshot detects change against the immediately preceding poll; Seen gates delivery so a
//! slot is reported at most once per monitor, date and venue, across restarts.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::domain::{Monitor, SeenEntry, TimeWindow};
use crate::error::Result;
use crate::showtime;
use crate::storage::Storage;

/// Canonical labels of `labels`, restricted to `window` when one is set.
pub fn canonical_set(labels: &[String], window: Option<&TimeWindow>) -> BTreeSet<String> {
    labels
        .iter()
        .filter_map(|l| showtime::canonicalize(l))
        .filter(|canon| match window {
            Some(w) => showtime::time_of_day(canon).map_or(false, |t| w.contains(t)),
            None => true,
        })
        .collect()
}

pub struct DedupEngine<'a> {
    storage: &'a dyn Storage,
}

impl<'a> DedupEngine<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Diff one venue's current labels for `date` and return the showtimes to notify,
    /// sorted chronologically.
    ///
    /// With `monitor.baseline` set, everything visible is recorded and nothing is returned.
    pub async fn process(
        &self,
        monitor: &Monitor,
        date: NaiveDate,
        venue: &str,
        labels: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let current = canonical_set(labels, monitor.window.as_ref());
        let previous = self.storage.get_snapshot(&monitor.id, date, venue).await?;

        let candidates: Vec<&String> = if monitor.baseline {
            current.iter().collect()
        } else {
            current.difference(&previous).collect()
        };

        let mut fresh = Vec::new();
        for showtime in candidates {
            let entry = SeenEntry {
                monitor_id: monitor.id.clone(),
                date,
                venue: venue.to_string(),
                showtime: showtime.clone(),
                first_seen: now,
            };
            if self.storage.insert_seen(&entry).await? && !monitor.baseline {
                fresh.push(showtime.clone());
            }
        }

        self.storage
            .replace_snapshot(&monitor.id, date, venue, &current, now)
            .await?;

        if !fresh.is_empty() {
            debug!(
                monitor = %monitor.id,
                %date,
                venue,
                "{} new showtime(s): {:?}",
                fresh.len(),
                fresh
            );
        }
        showtime::sort_chronologically(&mut fresh);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateMode, VenueFilter};
    use crate::storage::InMemoryStorage;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (InMemoryStorage, Monitor, NaiveDate) {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let monitor = Monitor::new(
            "m1",
            "https://example.com/e",
            DateMode::Fixed { dates: vec![date] },
            VenueFilter::from_names(["Cinema One"]),
        );
        (InMemoryStorage::new(), monitor, date)
    }

    #[tokio::test]
    async fn same_label_reports_once() {
        let (storage, monitor, date) = setup();
        let engine = DedupEngine::new(&storage);
        let now = Utc::now();

        let first = engine.process(&monitor, date, "Cinema One", &labels(&["10:00 AM"]), now).await.unwrap();
        assert_eq!(first, vec!["10:00 AM"]);
        let second = engine.process(&monitor, date, "Cinema One", &labels(&["10:00am "]), now).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn reappearing_slot_is_suppressed_by_seen() {
        let (storage, monitor, date) = setup();
        let engine = DedupEngine::new(&storage);
        let now = Utc::now();

        let n = engine.process(&monitor, date, "V", &labels(&["10:00 AM", "2:00 PM"]), now).await.unwrap();
        assert_eq!(n.len(), 2);
        let n1 = engine.process(&monitor, date, "V", &labels(&["2:00 PM"]), now).await.unwrap();
        assert!(n1.is_empty());
        assert_eq!(storage.get_snapshot("m1", date, "V").await.unwrap().len(), 1);

        // 10:00 AM is snapshot-new again but already in Seen
        let n2 = engine.process(&monitor, date, "V", &labels(&["10:00 AM", "2:00 PM"]), now).await.unwrap();
        assert!(n2.is_empty());
        assert_eq!(storage.get_snapshot("m1", date, "V").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn baseline_seeds_without_reporting() {
        let (storage, mut monitor, date) = setup();
        monitor.baseline = true;
        let engine = DedupEngine::new(&storage);

        let out = engine
            .process(&monitor, date, "V", &labels(&["9:00 AM", "12:00 PM", "6:00 PM"]), Utc::now())
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(storage.seen_for("m1").await.unwrap().len(), 3);
    }

    #[test]
    fn window_is_applied_before_diffing() {
        let late = labels(&["11:30 PM", "9:00 AM"]);
        let night = TimeWindow::parse("00:00", "06:00").unwrap();
        let evening = TimeWindow::parse("22:00", "23:59").unwrap();

        assert!(canonical_set(&late, Some(&night)).is_empty());
        assert_eq!(canonical_set(&late, Some(&evening)), ["11:30 PM".to_string()].into_iter().collect());
        assert_eq!(canonical_set(&late, None).len(), 2);
    }

    #[tokio::test]
    async fn results_are_sorted_chronologically() {
        let (storage, monitor, date) = setup();
        let engine = DedupEngine::new(&storage);
        let out = engine
            .process(&monitor, date, "V", &labels(&["9:00 PM", "10:00 AM", "1:00 PM"]), Utc::now())
            .await
            .unwrap();
        assert_eq!(out, vec!["10:00 AM", "1:00 PM", "9:00 PM"]);
    }
}
