//! One poll of one monitor: acquire, extract, diff, notify, book-keep.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::DedupEngine;
use crate::domain::{DateMode, Finding, Monitor, MonitorState, PollRun, RunStatus};
use crate::error::{Result, WatchError};
use crate::extract::{extract, VenueListing};
use crate::links::ensure_date_in_url;
use crate::metrics;
use crate::notify::{format, NotificationSink};
use crate::source::PageSource;
use crate::storage::Storage;

/// What a finished poll reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: RunStatus,
    pub new_showtimes: usize,
    pub error: Option<String>,
}

impl PollOutcome {
    fn ok(new_showtimes: usize, degraded: bool) -> Self {
        Self {
            status: if degraded { RunStatus::Degraded } else { RunStatus::Ok },
            new_showtimes,
            error: None,
        }
    }

    fn failed(error: &WatchError) -> Self {
        Self {
            status: RunStatus::Failed,
            new_showtimes: 0,
            error: Some(error.to_string()),
        }
    }
}

pub struct Poll<'a> {
    pub storage: &'a dyn Storage,
    pub sink: &'a dyn NotificationSink,
    pub source: &'a mut dyn PageSource,
}

impl<'a> Poll<'a> {
    /// Run the poll. Every error stops here: it is reported, recorded and returned as an
    /// outcome, never propagated to other monitors.
    #[instrument(skip_all, fields(monitor = %monitor.id, state = %monitor.state))]
    pub async fn execute(mut self, monitor: &Monitor, today: NaiveDate, now: DateTime<Utc>) -> PollOutcome {
        let started = Instant::now();
        let result = match monitor.state {
            MonitorState::Discover => self.discover(monitor, today, now).await,
            _ => self.watch(monitor, today, now).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Poll failed: {}", e);
                self.sink.notify(format::error(monitor, &e.to_string()));
                PollOutcome::failed(&e)
            }
        };

        let run = PollRun {
            monitor_id: monitor.id.clone(),
            started_at: now,
            finished_at: now + chrono::Duration::milliseconds(started.elapsed().as_millis() as i64),
            status: outcome.status,
            error: outcome.error.clone(),
        };
        if let Err(e) = self.storage.record_run(&run).await {
            warn!("Could not record poll run: {}", e);
        }
        metrics::poll::finished(outcome.status.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    /// One-shot venue inventory, then PAUSED. Failures leave the state alone so the next
    /// tick retries.
    async fn discover(&mut self, monitor: &Monitor, today: NaiveDate, now: DateTime<Utc>) -> Result<PollOutcome> {
        let date = monitor.effective_dates(today).first().copied().unwrap_or(today);
        let page = self.source.open(&ensure_date_in_url(&monitor.url, date)).await?;

        let mut names: Vec<String> = extract(&page.html).into_iter().map(|l| l.venue).collect();
        names.sort();
        names.dedup();
        for name in &names {
            self.storage.record_venue(&monitor.id, date, name, now).await?;
        }
        let paused = self
            .storage
            .transition_state(&monitor.id, MonitorState::Discover, MonitorState::Paused, now)
            .await?;
        if !paused {
            info!("State changed during discovery; leaving it as is");
        }
        self.storage.mark_run(&monitor.id, now).await?;

        info!("Discovered {} venue(s) for {}", names.len(), date);
        self.sink.notify(format::discovery(monitor, date, &names));
        Ok(PollOutcome::ok(0, page.degradation.is_some()))
    }

    async fn watch(&mut self, monitor: &Monitor, today: NaiveDate, now: DateTime<Utc>) -> Result<PollOutcome> {
        let dates = monitor.effective_dates(today);
        if dates.is_empty() {
            if matches!(monitor.date_mode, DateMode::Until { .. }) {
                let paused = self
                    .storage
                    .transition_state(&monitor.id, MonitorState::Running, MonitorState::Paused, now)
                    .await?;
                if paused {
                    info!("End date reached; auto-paused");
                    self.sink.notify(format::auto_paused(monitor));
                }
            }
            return Ok(PollOutcome::ok(0, false));
        }

        let mut findings: Vec<Finding> = Vec::new();
        let mut degraded = false;
        let mut failure: Option<WatchError> = None;

        for date in dates {
            let url = ensure_date_in_url(&monitor.url, date);
            let (listings, complete) = match self.source.open(&url).await {
                Ok(page) => {
                    degraded |= page.degradation.is_some();
                    (extract(&page.html), page.degradation.is_none())
                }
                Err(e @ WatchError::SessionUnavailable(_)) => {
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    warn!("Acquisition failed for {}: {}", date, e);
                    degraded = true;
                    (Vec::new(), false)
                }
            };
            let processed =
                Self::process_date(self.storage, monitor, date, &listings, complete, now, &mut findings).await;
            if let Err(e) = processed {
                failure = Some(e);
                break;
            }
        }

        // Seen entries already written must not be swallowed, whatever happens next
        if !findings.is_empty() {
            metrics::poll::new_showtimes(findings.len());
            info!("{} new showtime(s)", findings.len());
            self.sink.notify(format::new_shows(monitor, &findings));
            if let Err(e) = self.storage.mark_alert(&monitor.id, now).await {
                warn!("Could not record alert time: {}", e);
            }
        }

        match failure {
            Some(e) if e.is_persistence() => return Err(e),
            Some(e) => {
                warn!("Poll cut short: {}", e);
                self.sink.notify(format::error(monitor, &e.to_string()));
                self.storage.mark_run(&monitor.id, now).await?;
                return Ok(PollOutcome {
                    status: RunStatus::Failed,
                    new_showtimes: findings.len(),
                    error: Some(e.to_string()),
                });
            }
            None => {}
        }

        if monitor.baseline {
            self.storage.clear_baseline(&monitor.id).await?;
            info!("Baseline captured");
        }
        self.storage.mark_run(&monitor.id, now).await?;
        Ok(PollOutcome::ok(findings.len(), degraded))
    }

    /// Diff every listed venue of `date`. A `complete` page also drops the snapshots of
    /// watched venues that are no longer listed.
    async fn process_date(
        storage: &dyn Storage,
        monitor: &Monitor,
        date: NaiveDate,
        listings: &[VenueListing],
        complete: bool,
        now: DateTime<Utc>,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let engine = DedupEngine::new(storage);
        for listing in listings {
            storage.record_venue(&monitor.id, date, &listing.venue, now).await?;
            if !monitor.venues.matches(&listing.venue) {
                continue;
            }
            let fresh = engine
                .process(monitor, date, &listing.venue, &listing.showtimes, now)
                .await?;
            findings.extend(fresh.into_iter().map(|showtime| Finding {
                date,
                venue: listing.venue.clone(),
                showtime,
            }));
        }

        if complete {
            let present: BTreeSet<String> = listings
                .iter()
                .filter(|l| monitor.venues.matches(&l.venue))
                .map(|l| l.venue.clone())
                .collect();
            let dropped = storage.retain_snapshots(&monitor.id, date, &present).await?;
            if dropped > 0 {
                debug!("Dropped {} snapshot(s) of venues gone from {}", dropped, date);
            }
        }
        Ok(())
    }
}
