use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use super::{lock, Storage};
use crate::constants::RUN_HISTORY_PER_MONITOR;
use crate::domain::{IndexedVenue, Monitor, MonitorState, PollRun, SeenEntry};
use crate::error::Result;

type SeenKey = (String, NaiveDate, String, String);
type SlotKey = (String, NaiveDate, String);

/// In-memory storage implementation for tests and `--memory` runs
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    monitors: Arc<Mutex<HashMap<String, Monitor>>>,
    seen: Arc<Mutex<BTreeMap<SeenKey, DateTime<Utc>>>>,
    snapshots: Arc<Mutex<HashMap<SlotKey, BTreeSet<String>>>>,
    venues: Arc<Mutex<BTreeMap<SlotKey, DateTime<Utc>>>>,
    runs: Arc<Mutex<Vec<PollRun>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: &str, at: Option<DateTime<Utc>>, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Monitor),
    {
        let mut monitors = lock(&self.monitors, "monitors")?;
        match monitors.get_mut(id) {
            Some(m) => {
                f(m);
                if let Some(at) = at {
                    m.updated_at = at;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let monitors = lock(&self.monitors, "monitors")?;
        let mut out: Vec<Monitor> = monitors.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        Ok(lock(&self.monitors, "monitors")?.get(id).cloned())
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<()> {
        lock(&self.monitors, "monitors")?.insert(monitor.id.clone(), monitor.clone());
        debug!("Upserted monitor {}", monitor.id);
        Ok(())
    }

    async fn set_state(&self, id: &str, state: MonitorState, at: DateTime<Utc>) -> Result<bool> {
        self.update(id, Some(at), |m| m.state = state)
    }

    async fn transition_state(
        &self,
        id: &str,
        from: MonitorState,
        to: MonitorState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut monitors = lock(&self.monitors, "monitors")?;
        match monitors.get_mut(id) {
            Some(m) if m.state == from => {
                m.state = to;
                m.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_snooze(&self, id: &str, until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Result<bool> {
        self.update(id, Some(at), |m| m.snooze_until = until)
    }

    async fn mark_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(id, None, |m| m.last_run = Some(at)).map(|_| ())
    }

    async fn mark_alert(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(id, None, |m| m.last_alert = Some(at)).map(|_| ())
    }

    async fn clear_baseline(&self, id: &str) -> Result<()> {
        self.update(id, None, |m| m.baseline = false).map(|_| ())
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let removed = lock(&self.monitors, "monitors")?.remove(id).is_some();
        lock(&self.seen, "seen")?.retain(|k, _| k.0 != id);
        lock(&self.snapshots, "snapshots")?.retain(|k, _| k.0 != id);
        lock(&self.venues, "venues")?.retain(|k, _| k.0 != id);
        lock(&self.runs, "runs")?.retain(|r| r.monitor_id != id);
        Ok(removed)
    }

    async fn insert_seen(&self, entry: &SeenEntry) -> Result<bool> {
        let key = (
            entry.monitor_id.clone(),
            entry.date,
            entry.venue.clone(),
            entry.showtime.clone(),
        );
        let mut seen = lock(&self.seen, "seen")?;
        if seen.contains_key(&key) {
            return Ok(false);
        }
        seen.insert(key, entry.first_seen);
        Ok(true)
    }

    async fn seen_for(&self, monitor_id: &str) -> Result<Vec<SeenEntry>> {
        let seen = lock(&self.seen, "seen")?;
        Ok(seen
            .iter()
            .filter(|(k, _)| k.0 == monitor_id)
            .map(|((monitor_id, date, venue, showtime), first_seen)| SeenEntry {
                monitor_id: monitor_id.clone(),
                date: *date,
                venue: venue.clone(),
                showtime: showtime.clone(),
                first_seen: *first_seen,
            })
            .collect())
    }

    async fn get_snapshot(&self, monitor_id: &str, date: NaiveDate, venue: &str) -> Result<BTreeSet<String>> {
        let snapshots = lock(&self.snapshots, "snapshots")?;
        Ok(snapshots
            .get(&(monitor_id.to_string(), date, venue.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_snapshot(
        &self,
        monitor_id: &str,
        date: NaiveDate,
        venue: &str,
        showtimes: &BTreeSet<String>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        lock(&self.snapshots, "snapshots")?.insert(
            (monitor_id.to_string(), date, venue.to_string()),
            showtimes.clone(),
        );
        Ok(())
    }

    async fn retain_snapshots(&self, monitor_id: &str, date: NaiveDate, keep: &BTreeSet<String>) -> Result<usize> {
        let mut snapshots = lock(&self.snapshots, "snapshots")?;
        let before = snapshots.len();
        snapshots.retain(|(id, d, venue), _| id != monitor_id || *d != date || keep.contains(venue));
        Ok(before - snapshots.len())
    }

    async fn record_venue(&self, monitor_id: &str, date: NaiveDate, venue: &str, at: DateTime<Utc>) -> Result<()> {
        lock(&self.venues, "venues")?.insert((monitor_id.to_string(), date, venue.to_string()), at);
        Ok(())
    }

    async fn indexed_venues(&self, monitor_id: &str) -> Result<Vec<IndexedVenue>> {
        let venues = lock(&self.venues, "venues")?;
        Ok(venues
            .iter()
            .filter(|(k, _)| k.0 == monitor_id)
            .map(|((_, date, venue), last_seen)| IndexedVenue {
                date: *date,
                venue: venue.clone(),
                last_seen: *last_seen,
            })
            .collect())
    }

    async fn record_run(&self, run: &PollRun) -> Result<()> {
        let mut runs = lock(&self.runs, "runs")?;
        runs.push(run.clone());
        let kept = runs.iter().filter(|r| r.monitor_id == run.monitor_id).count();
        let mut excess = kept.saturating_sub(RUN_HISTORY_PER_MONITOR);
        if excess > 0 {
            runs.retain(|r| {
                if excess > 0 && r.monitor_id == run.monitor_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(())
    }

    async fn recent_runs(&self, monitor_id: &str, limit: usize) -> Result<Vec<PollRun>> {
        let runs = lock(&self.runs, "runs")?;
        Ok(runs
            .iter()
            .rev()
            .filter(|r| r.monitor_id == monitor_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
