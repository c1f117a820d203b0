//! Scheduler loop and monitor state machine driver.
//!
//! A single loop ticks at a fixed period. Each tick sends due heartbeats, settles STOPPING
//! monitors, and dispatches every eligible, due monitor as its own task. A monitor's page
//! source moves into its poll task and comes back when the task is reaped, so two polls
//! never share a session and a monitor is never dispatched twice.

mod heartbeat;
mod poll;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::constants::MAX_TICK_BACKOFF_SECS;
use crate::domain::{Monitor, MonitorState};
use crate::error::Result;
use crate::metrics;
use crate::notify::{format, NotificationSink};
use crate::source::{AcquireSettings, PageSource, ResilientPageSource, SessionFactory, TraceWriter};
use crate::storage::Storage;

pub use heartbeat::HeartbeatBook;
pub use poll::{Poll, PollOutcome};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub timezone: Tz,
    pub max_concurrent_polls: usize,
    pub acquire: AcquireSettings,
    pub trace: Option<TraceWriter>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            tick: Duration::from_secs(config.scheduler.tick_secs),
            timezone: config.timezone()?,
            max_concurrent_polls: config.scheduler.max_concurrent_polls.max(1),
            acquire: AcquireSettings::from(&config.browser),
            trace: config
                .trace
                .enabled
                .then(|| TraceWriter::new(config.trace.artifacts_dir.clone())),
        })
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default()).unwrap_or_else(|_| Self {
            tick: Duration::from_secs(crate::constants::DEFAULT_TICK_SECS),
            timezone: chrono_tz::Asia::Kolkata,
            max_concurrent_polls: crate::constants::DEFAULT_MAX_CONCURRENT_POLLS,
            acquire: AcquireSettings::default(),
            trace: None,
        })
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub monitors: usize,
    pub heartbeats: usize,
    pub dispatched: usize,
    pub reaped: usize,
}

struct PollReturn {
    source: Box<dyn PageSource>,
    outcome: PollOutcome,
}

pub struct Scheduler {
    storage: Arc<dyn Storage>,
    sink: Arc<dyn NotificationSink>,
    factory: Arc<dyn SessionFactory>,
    settings: SchedulerSettings,
    heartbeats: HeartbeatBook,
    /// Idle page sources, one per monitor.
    sources: HashMap<String, Box<dyn PageSource>>,
    in_flight: HashMap<String, JoinHandle<PollReturn>>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        sink: Arc<dyn NotificationSink>,
        factory: Arc<dyn SessionFactory>,
        settings: SchedulerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_polls.max(1)));
        Self {
            storage,
            sink,
            factory,
            settings,
            heartbeats: HeartbeatBook::new(),
            sources: HashMap::new(),
            in_flight: HashMap::new(),
            permits,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, monitor_id: &str) -> bool {
        self.in_flight.contains_key(monitor_id)
    }

    /// Run until `cancel` fires, then wait for in-flight polls and release sessions.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "Scheduler started: tick {:?}, timezone {}, up to {} concurrent poll(s)",
            self.settings.tick, self.settings.timezone, self.settings.max_concurrent_polls
        );
        let mut delay = self.settings.tick;
        loop {
            match self.tick_at(Utc::now()).await {
                Ok(summary) => {
                    debug!(?summary, "tick complete");
                    delay = self.settings.tick;
                }
                Err(e) => {
                    metrics::poll::tick_error();
                    delay = (delay * 2).min(Duration::from_secs(MAX_TICK_BACKOFF_SECS));
                    error!("Tick failed: {}; retrying in {:?}", e, delay);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Scheduler stopping; waiting for {} in-flight poll(s)", self.in_flight.len());
        self.shutdown().await;
    }

    /// One scheduler tick at `now`. Only listing monitors can fail the tick.
    #[instrument(skip(self))]
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut summary = TickSummary {
            reaped: self.reap().await,
            ..TickSummary::default()
        };

        let monitors = self.storage.list_monitors().await?;
        summary.monitors = monitors.len();
        self.forget_deleted(&monitors).await;

        let local = now.with_timezone(&self.settings.timezone);
        let today = local.date_naive();
        let local_time = local.time();

        for monitor in monitors {
            if let Some(beat) = self.heartbeats.due(&monitor, today, now) {
                self.sink.notify(beat);
                summary.heartbeats += 1;
            }

            match monitor.state {
                MonitorState::Stopping => {
                    if !self.is_in_flight(&monitor.id) {
                        self.finish_stop(&monitor, now).await;
                    }
                    continue;
                }
                MonitorState::Stopped => {
                    self.release(&monitor.id).await;
                    continue;
                }
                state if !state.is_pollable() => continue,
                _ => {}
            }

            if self.is_in_flight(&monitor.id) {
                debug!(monitor = %monitor.id, "poll still in flight");
                continue;
            }
            if monitor.is_snoozed(now) || !monitor.in_window(local_time) {
                continue;
            }
            if !monitor.is_due(now) {
                continue;
            }

            self.dispatch(monitor, today, now);
            summary.dispatched += 1;
        }
        Ok(summary)
    }

    /// Wait for every in-flight poll and take its source back.
    pub async fn drain(&mut self) -> usize {
        let ids: Vec<String> = self.in_flight.keys().cloned().collect();
        let mut drained = 0;
        for id in ids {
            if let Some(handle) = self.in_flight.remove(&id) {
                self.collect(id, handle).await;
                drained += 1;
            }
        }
        drained
    }

    pub async fn shutdown(&mut self) {
        self.drain().await;
        for (id, mut source) in self.sources.drain() {
            source.close().await;
            debug!(monitor = %id, "session closed");
        }
    }

    fn dispatch(&mut self, monitor: Monitor, today: chrono::NaiveDate, now: DateTime<Utc>) {
        let mut source = self.sources.remove(&monitor.id).unwrap_or_else(|| {
            Box::new(ResilientPageSource::new(
                self.factory.clone(),
                self.settings.acquire.clone(),
                self.settings.trace.clone(),
            ))
        });
        let storage = self.storage.clone();
        let sink = self.sink.clone();
        let permits = self.permits.clone();
        let id = monitor.id.clone();

        debug!(monitor = %id, state = %monitor.state, "dispatching poll");
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let poll = Poll {
                storage: storage.as_ref(),
                sink: sink.as_ref(),
                source: source.as_mut(),
            };
            let outcome = poll.execute(&monitor, today, now).await;
            PollReturn { source, outcome }
        });
        self.in_flight.insert(id, handle);
    }

    async fn reap(&mut self) -> usize {
        let finished: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            if let Some(handle) = self.in_flight.remove(id) {
                self.collect(id.clone(), handle).await;
            }
        }
        finished.len()
    }

    async fn collect(&mut self, id: String, handle: JoinHandle<PollReturn>) {
        match handle.await {
            Ok(PollReturn { source, outcome }) => {
                debug!(monitor = %id, ?outcome, "poll reaped");
                self.sources.insert(id, source);
            }
            Err(e) => {
                // The source died with the task; a new one is built on next dispatch
                error!(monitor = %id, "poll task aborted: {}", e);
            }
        }
    }

    async fn finish_stop(&mut self, monitor: &Monitor, now: DateTime<Utc>) {
        let stopped = self
            .storage
            .transition_state(&monitor.id, MonitorState::Stopping, MonitorState::Stopped, now)
            .await;
        match stopped {
            Ok(true) => {
                self.release(&monitor.id).await;
                info!(monitor = %monitor.id, "Monitor stopped");
                self.sink.notify(format::stopped(monitor));
            }
            Ok(false) => debug!(monitor = %monitor.id, "stop request withdrawn before it completed"),
            Err(e) => warn!(monitor = %monitor.id, "Could not mark monitor stopped: {}", e),
        }
    }

    async fn release(&mut self, monitor_id: &str) {
        if let Some(mut source) = self.sources.remove(monitor_id) {
            source.close().await;
        }
    }

    async fn forget_deleted(&mut self, monitors: &[Monitor]) {
        let live: HashSet<&str> = monitors.iter().map(|m| m.id.as_str()).collect();
        self.heartbeats.retain(&live);
        let gone: Vec<String> = self
            .sources
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            self.release(&id).await;
        }
    }
}
