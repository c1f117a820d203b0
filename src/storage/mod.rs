//! Persistence for monitors and the dedup tables.

mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::{IndexedVenue, Monitor, MonitorState, PollRun, SeenEntry};
use crate::error::{Result, WatchError};

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage trait for monitors, seen entries, snapshots, the venue index and poll runs.
///
/// Mutating monitor operations return `false` when the monitor does not exist.
#[async_trait]
pub trait Storage: Send + Sync {
    // Monitor operations
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;
    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>>;
    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<()>;
    async fn set_state(&self, id: &str, state: MonitorState, at: DateTime<Utc>) -> Result<bool>;
    /// Compare-and-set: moves to `to` only while the monitor is still in `from`.
    async fn transition_state(
        &self,
        id: &str,
        from: MonitorState,
        to: MonitorState,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn set_snooze(&self, id: &str, until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_run(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn mark_alert(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn clear_baseline(&self, id: &str) -> Result<()>;
    /// Removes the monitor together with its seen entries, snapshots, venue index and runs.
    async fn delete_monitor(&self, id: &str) -> Result<bool>;

    // Seen operations (append-only)
    /// Insert if absent; `true` only for a fresh insert.
    async fn insert_seen(&self, entry: &SeenEntry) -> Result<bool>;
    async fn seen_for(&self, monitor_id: &str) -> Result<Vec<SeenEntry>>;

    // Snapshot operations
    /// Showtimes recorded by the previous poll; empty when there was none.
    async fn get_snapshot(&self, monitor_id: &str, date: NaiveDate, venue: &str) -> Result<BTreeSet<String>>;
    async fn replace_snapshot(
        &self,
        monitor_id: &str,
        date: NaiveDate,
        venue: &str,
        showtimes: &BTreeSet<String>,
        at: DateTime<Utc>,
    ) -> Result<()>;
    /// Drop the snapshots of `date` for venues not in `keep`. Returns how many were dropped.
    async fn retain_snapshots(&self, monitor_id: &str, date: NaiveDate, keep: &BTreeSet<String>) -> Result<usize>;

    // Venue index operations
    async fn record_venue(&self, monitor_id: &str, date: NaiveDate, venue: &str, at: DateTime<Utc>) -> Result<()>;
    async fn indexed_venues(&self, monitor_id: &str) -> Result<Vec<IndexedVenue>>;

    // Poll run operations
    /// Appends the run, keeping only the newest `RUN_HISTORY_PER_MONITOR` per monitor.
    async fn record_run(&self, run: &PollRun) -> Result<()>;
    async fn recent_runs(&self, monitor_id: &str, limit: usize) -> Result<Vec<PollRun>>;
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| WatchError::Storage {
        message: format!("{} lock poisoned", what),
    })
}
