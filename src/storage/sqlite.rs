use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use super::{lock, Storage};
use crate::constants::RUN_HISTORY_PER_MONITOR;
use crate::domain::{
    compact_date, parse_compact_date, DateMode, IndexedVenue, Monitor, MonitorState, PollRun, RunStatus,
    SeenEntry, TimeWindow, VenueFilter,
};
use crate::error::{Result, WatchError};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS monitors (
        id              TEXT PRIMARY KEY,
        url             TEXT NOT NULL,
        mode            TEXT NOT NULL,
        dates           TEXT NOT NULL DEFAULT '[]',
        rolling_days    INTEGER NOT NULL DEFAULT 0,
        end_date        TEXT,
        venues          TEXT NOT NULL DEFAULT '[]',
        interval_secs   INTEGER NOT NULL,
        time_start      TEXT,
        time_end        TEXT,
        state           TEXT NOT NULL,
        snooze_until    INTEGER,
        heartbeat_secs  INTEGER NOT NULL,
        baseline        INTEGER NOT NULL,
        last_run_ts     INTEGER,
        last_alert_ts   INTEGER,
        notify_target   TEXT,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS seen (
        monitor_id      TEXT NOT NULL,
        date            TEXT NOT NULL,
        venue           TEXT NOT NULL,
        showtime        TEXT NOT NULL,
        first_seen_ts   INTEGER NOT NULL,
        PRIMARY KEY (monitor_id, date, venue, showtime)
    );
    CREATE TABLE IF NOT EXISTS snapshots (
        monitor_id      TEXT NOT NULL,
        date            TEXT NOT NULL,
        venue           TEXT NOT NULL,
        times_json      TEXT NOT NULL,
        updated_at      INTEGER NOT NULL,
        PRIMARY KEY (monitor_id, date, venue)
    );
    CREATE TABLE IF NOT EXISTS venue_index (
        monitor_id      TEXT NOT NULL,
        date            TEXT NOT NULL,
        venue           TEXT NOT NULL,
        last_seen_ts    INTEGER NOT NULL,
        PRIMARY KEY (monitor_id, date, venue)
    );
    CREATE TABLE IF NOT EXISTS runs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        monitor_id      TEXT NOT NULL,
        started_ts      INTEGER NOT NULL,
        finished_ts     INTEGER NOT NULL,
        status          TEXT NOT NULL,
        error           TEXT
    );
    CREATE INDEX IF NOT EXISTS runs_by_monitor ON runs (monitor_id, id);
"#;

const MONITOR_COLUMNS: &str = "id, url, mode, dates, rolling_days, end_date, venues, interval_secs, \
     time_start, time_end, state, snooze_until, heartbeat_secs, baseline, last_run_ts, last_alert_ts, \
     notify_target, created_at, updated_at";

/// SQLite-backed storage. One connection, serialized behind a mutex.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened state database at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn touch(&self, sql: &str, id: &str, value: Option<i64>, at: Option<DateTime<Utc>>) -> Result<bool> {
        let conn = lock(&self.conn, "sqlite")?;
        let changed = match at {
            Some(at) => conn.execute(sql, params![value, ts(at), id])?,
            None => conn.execute(sql, params![value, id])?,
        };
        Ok(changed > 0)
    }
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| WatchError::Storage {
        message: format!("timestamp out of range: {}", secs),
    })
}

fn opt_ts(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(from_ts).transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    parse_compact_date(s).ok_or_else(|| WatchError::Storage {
        message: format!("bad stored date '{}'", s),
    })
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| WatchError::Storage {
        message: format!("bad stored time '{}': {}", s, e),
    })
}

/// Column values of a `monitors` row, read before any fallible decoding.
struct MonitorRow {
    id: String,
    url: String,
    mode: String,
    dates: String,
    rolling_days: i64,
    end_date: Option<String>,
    venues: String,
    interval_secs: i64,
    time_start: Option<String>,
    time_end: Option<String>,
    state: String,
    snooze_until: Option<i64>,
    heartbeat_secs: i64,
    baseline: bool,
    last_run_ts: Option<i64>,
    last_alert_ts: Option<i64>,
    notify_target: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl MonitorRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            mode: row.get(2)?,
            dates: row.get(3)?,
            rolling_days: row.get(4)?,
            end_date: row.get(5)?,
            venues: row.get(6)?,
            interval_secs: row.get(7)?,
            time_start: row.get(8)?,
            time_end: row.get(9)?,
            state: row.get(10)?,
            snooze_until: row.get(11)?,
            heartbeat_secs: row.get(12)?,
            baseline: row.get::<_, i64>(13)? != 0,
            last_run_ts: row.get(14)?,
            last_alert_ts: row.get(15)?,
            notify_target: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn into_monitor(self) -> Result<Monitor> {
        let date_mode = match self.mode.as_str() {
            "FIXED" => {
                let raw: Vec<String> = serde_json::from_str(&self.dates)?;
                let dates = raw.iter().map(|d| parse_date(d)).collect::<Result<Vec<_>>>()?;
                DateMode::Fixed { dates }
            }
            "ROLLING" => DateMode::Rolling {
                days: self.rolling_days.max(0) as u32,
            },
            "UNTIL" => {
                let until = self.end_date.as_deref().ok_or_else(|| WatchError::Storage {
                    message: format!("monitor {} is UNTIL without an end date", self.id),
                })?;
                DateMode::Until { until: parse_date(until)? }
            }
            other => {
                return Err(WatchError::Storage {
                    message: format!("monitor {} has unknown mode '{}'", self.id, other),
                })
            }
        };
        let names: Vec<String> = serde_json::from_str(&self.venues)?;
        let window = match (self.time_start.as_deref(), self.time_end.as_deref()) {
            (Some(start), Some(end)) => Some(TimeWindow::new(parse_time(start)?, parse_time(end)?)),
            _ => None,
        };

        Ok(Monitor {
            id: self.id,
            url: self.url,
            date_mode,
            venues: VenueFilter::from_names(names),
            interval_secs: self.interval_secs,
            window,
            state: self.state.parse()?,
            snooze_until: opt_ts(self.snooze_until)?,
            heartbeat_secs: self.heartbeat_secs,
            baseline: self.baseline,
            last_run: opt_ts(self.last_run_ts)?,
            last_alert: opt_ts(self.last_alert_ts)?,
            notify_target: self.notify_target,
            created_at: from_ts(self.created_at)?,
            updated_at: from_ts(self.updated_at)?,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitors ORDER BY created_at, id",
            MONITOR_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut raw = Vec::new();
        while let Some(row) = rows.next()? {
            raw.push(MonitorRow::read(row)?);
        }
        raw.into_iter().map(MonitorRow::into_monitor).collect()
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM monitors WHERE id = ?1", MONITOR_COLUMNS))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(MonitorRow::read(row)?.into_monitor()?))
        } else {
            Ok(None)
        }
    }

    async fn upsert_monitor(&self, m: &Monitor) -> Result<()> {
        let (dates, rolling_days, end_date) = match &m.date_mode {
            DateMode::Fixed { dates } => {
                let compact: Vec<String> = dates.iter().map(|d| compact_date(*d)).collect();
                (serde_json::to_string(&compact)?, 0i64, None)
            }
            DateMode::Rolling { days } => ("[]".to_string(), *days as i64, None),
            DateMode::Until { until } => ("[]".to_string(), 0i64, Some(compact_date(*until))),
        };
        let venues = serde_json::to_string(m.venues.names())?;
        let (time_start, time_end) = match m.window {
            Some(w) => (
                Some(w.start.format("%H:%M").to_string()),
                Some(w.end.format("%H:%M").to_string()),
            ),
            None => (None, None),
        };

        let conn = lock(&self.conn, "sqlite")?;
        conn.execute(
            &format!(
                "INSERT INTO monitors ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(id) DO UPDATE SET
                    url=excluded.url, mode=excluded.mode, dates=excluded.dates,
                    rolling_days=excluded.rolling_days, end_date=excluded.end_date,
                    venues=excluded.venues, interval_secs=excluded.interval_secs,
                    time_start=excluded.time_start, time_end=excluded.time_end,
                    state=excluded.state, snooze_until=excluded.snooze_until,
                    heartbeat_secs=excluded.heartbeat_secs, baseline=excluded.baseline,
                    last_run_ts=excluded.last_run_ts, last_alert_ts=excluded.last_alert_ts,
                    notify_target=excluded.notify_target, updated_at=excluded.updated_at",
                MONITOR_COLUMNS
            ),
            params![
                m.id,
                m.url,
                m.date_mode.as_str(),
                dates,
                rolling_days,
                end_date,
                venues,
                m.interval_secs,
                time_start,
                time_end,
                m.state.as_str(),
                m.snooze_until.map(ts),
                m.heartbeat_secs,
                m.baseline as i64,
                m.last_run.map(ts),
                m.last_alert.map(ts),
                m.notify_target,
                ts(m.created_at),
                ts(m.updated_at),
            ],
        )?;
        debug!("Upserted monitor {}", m.id);
        Ok(())
    }

    async fn set_state(&self, id: &str, state: MonitorState, at: DateTime<Utc>) -> Result<bool> {
        let conn = lock(&self.conn, "sqlite")?;
        let changed = conn.execute(
            "UPDATE monitors SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), ts(at), id],
        )?;
        Ok(changed > 0)
    }

    async fn transition_state(
        &self,
        id: &str,
        from: MonitorState,
        to: MonitorState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = lock(&self.conn, "sqlite")?;
        let changed = conn.execute(
            "UPDATE monitors SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![to.as_str(), ts(at), id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    async fn set_snooze(&self, id: &str, until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Result<bool> {
        self.touch(
            "UPDATE monitors SET snooze_until = ?1, updated_at = ?2 WHERE id = ?3",
            id,
            until.map(ts),
            Some(at),
        )
    }

    async fn mark_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch("UPDATE monitors SET last_run_ts = ?1 WHERE id = ?2", id, Some(ts(at)), None)
            .map(|_| ())
    }

    async fn mark_alert(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch("UPDATE monitors SET last_alert_ts = ?1 WHERE id = ?2", id, Some(ts(at)), None)
            .map(|_| ())
    }

    async fn clear_baseline(&self, id: &str) -> Result<()> {
        self.touch("UPDATE monitors SET baseline = ?1 WHERE id = ?2", id, Some(0), None)
            .map(|_| ())
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let mut conn = lock(&self.conn, "sqlite")?;
        let tx = conn.transaction()?;
        for table in ["seen", "snapshots", "venue_index", "runs"] {
            tx.execute(&format!("DELETE FROM {} WHERE monitor_id = ?1", table), params![id])?;
        }
        let removed = tx.execute("DELETE FROM monitors WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn insert_seen(&self, e: &SeenEntry) -> Result<bool> {
        let conn = lock(&self.conn, "sqlite")?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen (monitor_id, date, venue, showtime, first_seen_ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![e.monitor_id, compact_date(e.date), e.venue, e.showtime, ts(e.first_seen)],
        )?;
        Ok(inserted == 1)
    }

    async fn seen_for(&self, monitor_id: &str) -> Result<Vec<SeenEntry>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt = conn.prepare(
            "SELECT date, venue, showtime, first_seen_ts FROM seen WHERE monitor_id = ?1 ORDER BY date, venue, showtime",
        )?;
        let mut rows = stmt.query(params![monitor_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            out.push(SeenEntry {
                monitor_id: monitor_id.to_string(),
                date: parse_date(&date)?,
                venue: row.get(1)?,
                showtime: row.get(2)?,
                first_seen: from_ts(row.get(3)?)?,
            });
        }
        Ok(out)
    }

    async fn get_snapshot(&self, monitor_id: &str, date: NaiveDate, venue: &str) -> Result<BTreeSet<String>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt =
            conn.prepare("SELECT times_json FROM snapshots WHERE monitor_id = ?1 AND date = ?2 AND venue = ?3")?;
        let mut rows = stmt.query(params![monitor_id, compact_date(date), venue])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            Ok(serde_json::from_str(&json)?)
        } else {
            Ok(BTreeSet::new())
        }
    }

    async fn replace_snapshot(
        &self,
        monitor_id: &str,
        date: NaiveDate,
        venue: &str,
        showtimes: &BTreeSet<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(showtimes)?;
        let conn = lock(&self.conn, "sqlite")?;
        conn.execute(
            "INSERT INTO snapshots (monitor_id, date, venue, times_json, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(monitor_id, date, venue) DO UPDATE SET times_json=excluded.times_json, updated_at=excluded.updated_at",
            params![monitor_id, compact_date(date), venue, json, ts(at)],
        )?;
        Ok(())
    }

    async fn retain_snapshots(&self, monitor_id: &str, date: NaiveDate, keep: &BTreeSet<String>) -> Result<usize> {
        let day = compact_date(date);
        let mut conn = lock(&self.conn, "sqlite")?;
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT venue FROM snapshots WHERE monitor_id = ?1 AND date = ?2")?;
            let venues = stmt
                .query_map(params![monitor_id, day], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            venues.into_iter().filter(|v| !keep.contains(v)).collect()
        };
        for venue in &stale {
            tx.execute(
                "DELETE FROM snapshots WHERE monitor_id = ?1 AND date = ?2 AND venue = ?3",
                params![monitor_id, day, venue],
            )?;
        }
        tx.commit()?;
        Ok(stale.len())
    }

    async fn record_venue(&self, monitor_id: &str, date: NaiveDate, venue: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = lock(&self.conn, "sqlite")?;
        conn.execute(
            "INSERT INTO venue_index (monitor_id, date, venue, last_seen_ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(monitor_id, date, venue) DO UPDATE SET last_seen_ts=excluded.last_seen_ts",
            params![monitor_id, compact_date(date), venue, ts(at)],
        )?;
        Ok(())
    }

    async fn indexed_venues(&self, monitor_id: &str) -> Result<Vec<IndexedVenue>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt = conn.prepare(
            "SELECT date, venue, last_seen_ts FROM venue_index WHERE monitor_id = ?1 ORDER BY date, venue",
        )?;
        let mut rows = stmt.query(params![monitor_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            out.push(IndexedVenue {
                date: parse_date(&date)?,
                venue: row.get(1)?,
                last_seen: from_ts(row.get(2)?)?,
            });
        }
        Ok(out)
    }

    async fn record_run(&self, run: &PollRun) -> Result<()> {
        let conn = lock(&self.conn, "sqlite")?;
        conn.execute(
            "INSERT INTO runs (monitor_id, started_ts, finished_ts, status, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.monitor_id,
                ts(run.started_at),
                ts(run.finished_at),
                run.status.as_str(),
                run.error
            ],
        )?;
        conn.execute(
            "DELETE FROM runs WHERE monitor_id = ?1 AND id NOT IN
                (SELECT id FROM runs WHERE monitor_id = ?1 ORDER BY id DESC LIMIT ?2)",
            params![run.monitor_id, RUN_HISTORY_PER_MONITOR as i64],
        )?;
        Ok(())
    }

    async fn recent_runs(&self, monitor_id: &str, limit: usize) -> Result<Vec<PollRun>> {
        let conn = lock(&self.conn, "sqlite")?;
        let mut stmt = conn.prepare(
            "SELECT started_ts, finished_ts, status, error FROM runs WHERE monitor_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![monitor_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get(2)?;
            out.push(PollRun {
                monitor_id: monitor_id.to_string(),
                started_at: from_ts(row.get(0)?)?,
                finished_at: from_ts(row.get(1)?)?,
                status: RunStatus::parse(&status),
                error: row.get(3)?,
            });
        }
        Ok(out)
    }
}
