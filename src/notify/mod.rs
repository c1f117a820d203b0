//! Outbound notifications.
//!
//! Sinks are fire-and-forget: `notify` never blocks the scheduler tick and never fails.
//! Delivery problems are logged by the sink itself.

pub mod format;
mod telegram;

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::metrics;

pub use telegram::TelegramSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewShows,
    Discovery,
    Heartbeat,
    AutoPaused,
    Stopped,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewShows => "new_shows",
            NotificationKind::Discovery => "discovery",
            NotificationKind::Heartbeat => "heartbeat",
            NotificationKind::AutoPaused => "auto_paused",
            NotificationKind::Stopped => "stopped",
            NotificationKind::Error => "error",
        }
    }
}

/// A button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Url { label: String, url: String },
    Callback { label: String, data: String },
}

impl Action {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Action::Url {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Action::Callback {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub monitor_id: String,
    /// Chat or channel to deliver to; sinks fall back to their default when unset.
    pub target: Option<String>,
    pub kind: NotificationKind,
    pub text: String,
    /// Rows of buttons.
    pub actions: Vec<Vec<Action>>,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, n: Notification) {
        metrics::notify::sent(n.kind.as_str());
        info!(monitor = %n.monitor_id, kind = n.kind.as_str(), "{}", n.text);
    }
}

/// Delivers every notification to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}
