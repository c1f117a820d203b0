use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{info, warn};

use crate::constants::*;
use crate::domain::{parse_compact_date, DateMode, Monitor, MonitorState, TimeWindow, VenueFilter};
use crate::error::{Result, WatchError};
use crate::storage::Storage;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub browser: BrowserConfig,
    pub trace: TraceConfig,
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    pub metrics: MetricsConfig,
    pub monitors: Vec<MonitorSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub timezone: String,
    pub max_concurrent_polls: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            timezone: DEFAULT_TIMEZONE.to_string(),
            max_concurrent_polls: DEFAULT_MAX_CONCURRENT_POLLS,
        }
    }
}

/// What renders pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    /// Headless Chromium driven over CDP.
    #[default]
    Chrome,
    /// Plain HTTP fetches; no script execution and no screenshots.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: BrowserEngine,
    /// Chromium binary; looked up on `PATH` when unset.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Pinned user agent; a desktop one is rotated in when unset.
    pub user_agent: Option<String>,
    pub locale: String,
    pub timezone: String,
    pub referer: String,
    pub platform: String,
    pub settle_ms: u64,
    pub reload_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub blank_text_threshold: usize,
    pub blank_html_threshold: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            chrome_path: None,
            headless: true,
            user_agent: None,
            locale: DEFAULT_LOCALE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            settle_ms: DEFAULT_SETTLE_MS,
            reload_backoff_ms: DEFAULT_RELOAD_BACKOFF_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            blank_text_threshold: BLANK_TEXT_THRESHOLD,
            blank_html_threshold: BLANK_HTML_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub artifacts_dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Fallback chat for monitors without their own target.
    pub chat_id: Option<String>,
    pub api_base: String,
    /// Per-request timeout for the Bot API.
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: TELEGRAM_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

/// A `[[monitors]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSeed {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub dates: Option<Vec<String>>,
    #[serde(default)]
    pub rolling_days: Option<u32>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub venues: Vec<String>,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    #[serde(default)]
    pub window_start: Option<String>,
    #[serde(default)]
    pub window_end: Option<String>,
    #[serde(default = "default_heartbeat_minutes")]
    pub heartbeat_minutes: i64,
    #[serde(default = "default_true")]
    pub baseline: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub notify_target: Option<String>,
}

fn default_interval_minutes() -> i64 {
    DEFAULT_POLL_INTERVAL_MINUTES
}

fn default_heartbeat_minutes() -> i64 {
    DEFAULT_HEARTBEAT_MINUTES
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Read `path`, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `SHOWWATCH_DB`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `SHOWWATCH_TRACE`.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("SHOWWATCH_DB") {
            self.storage.path = PathBuf::from(path);
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat);
        }
        if let Ok(flag) = std::env::var("SHOWWATCH_TRACE") {
            self.trace.enabled = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.tick_secs == 0 {
            return Err(WatchError::Config("scheduler.tick_secs must be positive".to_string()));
        }
        if self.scheduler.max_concurrent_polls == 0 {
            return Err(WatchError::Config(
                "scheduler.max_concurrent_polls must be at least 1".to_string(),
            ));
        }
        self.timezone()?;
        if self.browser.timezone.parse::<Tz>().is_err() {
            return Err(WatchError::Config(format!(
                "unknown browser timezone '{}'",
                self.browser.timezone
            )));
        }
        let mut ids = std::collections::HashSet::new();
        for seed in &self.monitors {
            if !ids.insert(seed.id.as_str()) {
                return Err(WatchError::Config(format!("duplicate monitor id '{}'", seed.id)));
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|e| WatchError::Config(format!("unknown timezone '{}': {}", self.scheduler.timezone, e)))
    }
}

impl MonitorSeed {
    pub fn date_mode(&self) -> Result<DateMode> {
        match (&self.dates, self.rolling_days, &self.until) {
            (Some(dates), None, None) => {
                let parsed = dates
                    .iter()
                    .map(|d| {
                        parse_compact_date(d).ok_or_else(|| {
                            WatchError::InvalidMonitor(format!("monitor {}: bad date '{}'", self.id, d))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DateMode::Fixed { dates: parsed })
            }
            (None, Some(days), None) => Ok(DateMode::Rolling { days }),
            (None, None, Some(until)) => {
                let until = parse_compact_date(until).ok_or_else(|| {
                    WatchError::InvalidMonitor(format!("monitor {}: bad until date '{}'", self.id, until))
                })?;
                Ok(DateMode::Until { until })
            }
            _ => Err(WatchError::InvalidMonitor(format!(
                "monitor {} needs exactly one of dates, rolling_days, until",
                self.id
            ))),
        }
    }

    fn window(&self) -> Result<Option<TimeWindow>> {
        match (self.window_start.as_deref(), self.window_end.as_deref()) {
            (Some(start), Some(end)) => Ok(Some(TimeWindow::parse(start, end)?)),
            (None, None) => Ok(None),
            _ => Err(WatchError::InvalidMonitor(format!(
                "monitor {} window needs both window_start and window_end",
                self.id
            ))),
        }
    }

    /// Build a fresh monitor, validated against the local `today`.
    pub fn to_monitor(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<Monitor> {
        let mut monitor = Monitor::new(
            self.id.trim(),
            self.url.trim(),
            self.date_mode()?,
            VenueFilter::from_names(&self.venues),
        );
        monitor.interval_secs = self.interval_minutes * 60;
        monitor.heartbeat_secs = self.heartbeat_minutes * 60;
        monitor.window = self.window()?;
        monitor.baseline = self.baseline;
        monitor.notify_target = self.notify_target.clone();
        monitor.state = match &self.state {
            Some(s) => s.parse()?,
            None => MonitorState::Running,
        };
        monitor.created_at = now;
        monitor.updated_at = now;
        monitor.validate(today)?;
        Ok(monitor)
    }
}

/// Write config seeds into storage.
///
/// Existing monitors keep their runtime fields (state, snooze, baseline, timestamps); only
/// the configured fields are replaced. Invalid seeds are logged and skipped.
pub async fn seed_monitors(
    storage: &dyn Storage,
    seeds: &[MonitorSeed],
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut written = 0;
    for seed in seeds {
        let existing = storage.get_monitor(seed.id.trim()).await?;
        // A cutoff may legitimately lie in the past for a monitor that already exists
        let check_day = if existing.is_some() { NaiveDate::MIN } else { today };
        let configured = match seed.to_monitor(check_day, now) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping monitor seed {}: {}", seed.id, e);
                continue;
            }
        };
        let monitor = match existing {
            Some(current) => Monitor {
                state: current.state,
                snooze_until: current.snooze_until,
                baseline: current.baseline,
                last_run: current.last_run,
                last_alert: current.last_alert,
                created_at: current.created_at,
                ..configured
            },
            None => configured,
        };
        storage.upsert_monitor(&monitor).await?;
        written += 1;
    }
    info!("Seeded {} monitor(s) from config", written);
    Ok(written)
}
