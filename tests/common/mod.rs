#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use showwatch::domain::{IndexedVenue, Monitor, MonitorState, PollRun, SeenEntry};
use showwatch::notify::{Notification, NotificationKind, NotificationSink};
use showwatch::scheduler::SchedulerSettings;
use showwatch::source::{AcquireSettings, BrowserSession, SessionFactory};
use showwatch::storage::{InMemoryStorage, Storage};
use showwatch::{Result, WatchError};

/// A page listing venue cards the way the ticketing site embeds them in its state payload.
pub fn venue_page(venues: &[(&str, &[&str])]) -> String {
    let cards: Vec<String> = venues
        .iter()
        .map(|(name, times)| {
            let slots: Vec<String> = times.iter().map(|t| format!(r#"{{"title":"{}"}}"#, t)).collect();
            format!(
                r#"{{"type":"venue-card","additionalData":{{"venueName":"{}"}},"showtimes":[{}]}}"#,
                name,
                slots.join(",")
            )
        })
        .collect();
    format!(
        "<html><head><title>Buy tickets</title></head><body><div id=\"app\">Showtimes</div>\
         <script>window.__STATE__ = {{\"widgets\":[{}]}};</script></body></html>",
        cards.join(",")
    )
}

pub const BLOCKED_PAGE: &str =
    "<html><head><title>Just a moment...</title></head><body>Checking your browser</body></html>";

/// Pages served by URL, shared between the test and every session it hands out.
///
/// Each load (navigate or reload) takes the next page in the URL's queue; the last one
/// repeats. Unknown URLs serve an empty document.
#[derive(Clone, Default)]
pub struct FakeWeb {
    pages: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    pub sessions_created: Arc<AtomicUsize>,
    pub navigations: Arc<AtomicUsize>,
    pub reloads: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    /// Number of upcoming navigations that fail and kill their session.
    pub failing_navigations: Arc<AtomicUsize>,
    pub factory_down: Arc<AtomicBool>,
    /// Reloads fail and take the session down with them.
    pub reload_breaks_session: Arc<AtomicBool>,
    /// Held inside `navigate` to keep a poll in flight.
    pub navigation_delay: Arc<Mutex<Duration>>,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, html: impl Into<String>) {
        self.serve_sequence(url, vec![html.into()]);
    }

    pub fn serve_sequence(&self, url: &str, pages: Vec<String>) {
        self.pages.lock().unwrap().insert(url.to_string(), pages.into());
    }

    pub fn fail_next_navigations(&self, n: usize) {
        self.failing_navigations.store(n, Ordering::SeqCst);
    }

    pub fn set_factory_down(&self, down: bool) {
        self.factory_down.store(down, Ordering::SeqCst);
    }

    pub fn break_sessions_on_reload(&self, breaks: bool) {
        self.reload_breaks_session.store(breaks, Ordering::SeqCst);
    }

    pub fn set_navigation_delay(&self, delay: Duration) {
        *self.navigation_delay.lock().unwrap() = delay;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn load(&self, url: &str) -> String {
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => "<html><body></body></html>".to_string(),
        }
    }

    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(FakeSessionFactory { web: self.clone() })
    }
}

pub struct FakeSessionFactory {
    web: FakeWeb,
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        if self.web.factory_down.load(Ordering::SeqCst) {
            return Err(WatchError::Navigation {
                url: "about:blank".into(),
                message: "browser failed to launch".into(),
            });
        }
        self.web.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            web: self.web.clone(),
            url: String::new(),
            html: String::new(),
            alive: true,
        }))
    }
}

pub struct FakeSession {
    web: FakeWeb,
    url: String,
    html: String,
    alive: bool,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.web.navigations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.web.navigation_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .web
            .failing_navigations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || !self.alive {
            self.alive = false;
            return Err(WatchError::Navigation {
                url: url.to_string(),
                message: "target closed".into(),
            });
        }
        self.url = url.to_string();
        self.html = self.web.load(url);
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.web.reloads.fetch_add(1, Ordering::SeqCst);
        if self.web.reload_breaks_session.load(Ordering::SeqCst) {
            self.alive = false;
            return Err(WatchError::Navigation {
                url: self.url.clone(),
                message: "target crashed".into(),
            });
        }
        self.html = self.web.load(&self.url);
        Ok(())
    }

    fn html(&self) -> String {
        self.html.clone()
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn close(&mut self) {
        self.alive = false;
        self.web.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.all().into_iter().filter(|n| n.kind == kind).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// In-memory storage whose writes can be switched to fail.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    pub inner: InMemoryStorage,
    pub fail_writes: Arc<AtomicBool>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WatchError::Storage {
                message: "disk I/O error".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        self.inner.list_monitors().await
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        self.inner.get_monitor(id).await
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<()> {
        self.check()?;
        self.inner.upsert_monitor(monitor).await
    }

    async fn set_state(&self, id: &str, state: MonitorState, at: DateTime<Utc>) -> Result<bool> {
        self.check()?;
        self.inner.set_state(id, state, at).await
    }

    async fn transition_state(
        &self,
        id: &str,
        from: MonitorState,
        to: MonitorState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check()?;
        self.inner.transition_state(id, from, to, at).await
    }

    async fn set_snooze(&self, id: &str, until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Result<bool> {
        self.check()?;
        self.inner.set_snooze(id, until, at).await
    }

    async fn mark_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.mark_run(id, at).await
    }

    async fn mark_alert(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.mark_alert(id, at).await
    }

    async fn clear_baseline(&self, id: &str) -> Result<()> {
        self.check()?;
        self.inner.clear_baseline(id).await
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete_monitor(id).await
    }

    async fn insert_seen(&self, entry: &SeenEntry) -> Result<bool> {
        self.check()?;
        self.inner.insert_seen(entry).await
    }

    async fn seen_for(&self, monitor_id: &str) -> Result<Vec<SeenEntry>> {
        self.inner.seen_for(monitor_id).await
    }

    async fn get_snapshot(&self, monitor_id: &str, date: NaiveDate, venue: &str) -> Result<BTreeSet<String>> {
        self.inner.get_snapshot(monitor_id, date, venue).await
    }

    async fn replace_snapshot(
        &self,
        monitor_id: &str,
        date: NaiveDate,
        venue: &str,
        showtimes: &BTreeSet<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check()?;
        self.inner.replace_snapshot(monitor_id, date, venue, showtimes, at).await
    }

    async fn retain_snapshots(&self, monitor_id: &str, date: NaiveDate, keep: &BTreeSet<String>) -> Result<usize> {
        self.check()?;
        self.inner.retain_snapshots(monitor_id, date, keep).await
    }

    async fn record_venue(&self, monitor_id: &str, date: NaiveDate, venue: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.record_venue(monitor_id, date, venue, at).await
    }

    async fn indexed_venues(&self, monitor_id: &str) -> Result<Vec<IndexedVenue>> {
        self.inner.indexed_venues(monitor_id).await
    }

    async fn record_run(&self, run: &PollRun) -> Result<()> {
        self.check()?;
        self.inner.record_run(run).await
    }

    async fn recent_runs(&self, monitor_id: &str, limit: usize) -> Result<Vec<PollRun>> {
        self.inner.recent_runs(monitor_id, limit).await
    }
}

/// Acquisition with no waits and no blank detection, so plain fixtures are taken as-is.
pub fn quick_acquire() -> AcquireSettings {
    AcquireSettings {
        settle: Duration::ZERO,
        reload_backoff: Duration::ZERO,
        blank_text_threshold: 0,
        blank_html_threshold: 0,
    }
}

pub fn quick_settings() -> SchedulerSettings {
    SchedulerSettings {
        tick: Duration::from_millis(10),
        timezone: chrono_tz::UTC,
        max_concurrent_polls: 4,
        acquire: quick_acquire(),
        trace: None,
    }
}
