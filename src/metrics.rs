//! Metrics for the watcher.
//!
//! Counters and histograms are recorded through the `metrics` facade; when the
//! Prometheus exporter is installed they are served on `/metrics`, otherwise the
//! calls are no-ops.

use std::net::SocketAddr;

/// All metric names used by the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    PollsTotal,
    PollDuration,
    PageAcquisitions,
    PageLoadDuration,
    NewShowtimes,
    Notifications,
    TickErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PollsTotal => "showwatch_polls_total",
            MetricName::PollDuration => "showwatch_poll_duration_seconds",
            MetricName::PageAcquisitions => "showwatch_page_acquisitions_total",
            MetricName::PageLoadDuration => "showwatch_page_load_duration_seconds",
            MetricName::NewShowtimes => "showwatch_new_showtimes_total",
            MetricName::Notifications => "showwatch_notifications_total",
            MetricName::TickErrors => "showwatch_tick_errors_total",
        }
    }
}

/// Install the Prometheus exporter on `SHOWWATCH_METRICS_PORT` (default 9898).
pub fn init_metrics() {
    let port: u16 = std::env::var("SHOWWATCH_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            tracing::info!("Prometheus exporter listening on http://{}/metrics", addr);
        }
        Err(e) => {
            tracing::warn!("Prometheus exporter install failed (possibly already installed): {}", e);
        }
    }
}

pub mod poll {
    use super::MetricName;

    /// Record a finished poll with its outcome (`ok`, `degraded`, `failed`)
    pub fn finished(outcome: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::PollsTotal.as_str(), "outcome" => outcome).increment(1);
        ::metrics::histogram!(MetricName::PollDuration.as_str()).record(secs);
    }

    pub fn new_showtimes(count: usize) {
        ::metrics::counter!(MetricName::NewShowtimes.as_str()).increment(count as u64);
    }

    pub fn tick_error() {
        ::metrics::counter!(MetricName::TickErrors.as_str()).increment(1);
    }
}

pub mod page {
    use super::MetricName;

    /// Record a page acquisition (`ok`, `degraded`, `rebuilt`, `failed`)
    pub fn acquired(outcome: &'static str) {
        ::metrics::counter!(MetricName::PageAcquisitions.as_str(), "outcome" => outcome)
            .increment(1);
    }

    pub fn load_duration(secs: f64) {
        ::metrics::histogram!(MetricName::PageLoadDuration.as_str()).record(secs);
    }
}

pub mod notify {
    use super::MetricName;

    pub fn sent(kind: &'static str) {
        ::metrics::counter!(MetricName::Notifications.as_str(), "kind" => kind).increment(1);
    }
}
