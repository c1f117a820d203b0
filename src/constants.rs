/// Defaults shared by the scheduler, page source and configuration layer.
///
/// Most of these can be overridden in `config.toml`; the values here mirror what the
/// watcher has been running with in production.

// Scheduler
pub const DEFAULT_TICK_SECS: u64 = 10;
pub const MIN_POLL_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_POLL_INTERVAL_MINUTES: i64 = 5;
pub const DEFAULT_HEARTBEAT_MINUTES: i64 = 180;
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
pub const DEFAULT_MAX_CONCURRENT_POLLS: usize = 4;
/// Upper bound for the backoff applied when listing monitors keeps failing.
pub const MAX_TICK_BACKOFF_SECS: u64 = 300;
/// Length of the snooze offered on new-show notifications.
pub const QUICK_SNOOZE_HOURS: i64 = 2;
/// Widest span of dates one monitor may watch, for ROLLING and UNTIL alike.
pub const MAX_DATE_SPAN_DAYS: u32 = 366;
/// Poll runs kept per monitor; older rows are pruned on insert.
pub const RUN_HISTORY_PER_MONITOR: usize = 500;

// Page acquisition
pub const DEFAULT_SETTLE_MS: u64 = 2_000;
pub const DEFAULT_RELOAD_BACKOFF_MS: u64 = 2_500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const BLANK_TEXT_THRESHOLD: usize = 200;
pub const BLANK_HTML_THRESHOLD: usize = 5_000;

/// Title fragments of challenge interstitials (lowercased).
pub const BLOCK_TITLE_SIGNATURES: &[&str] = &["attention required | cloudflare", "just a moment..."];
/// Body fragments of block pages (lowercased).
pub const BLOCK_BODY_SIGNATURES: &[&str] = &["sorry, you have been blocked"];
/// Markers of a client-side render crash (lowercased).
pub const OOPS_SIGNATURES: &[&str] = &["oops! something went wrong"];

pub const DEFAULT_LOCALE: &str = "en-US,en";
pub const DEFAULT_REFERER: &str = "https://in.bookmyshow.com/";
pub const DEFAULT_PLATFORM: &str = "Windows";

// Storage / artifacts
pub const DEFAULT_DB_PATH: &str = "./artifacts/state.db";
pub const DEFAULT_ARTIFACTS_DIR: &str = "./artifacts";

// Notifications
pub const TELEGRAM_CHUNK_CHARS: usize = 4_000;
pub const TELEGRAM_MAX_RATE_LIMIT_RETRIES: u32 = 3;
pub const TELEGRAM_TIMEOUT_SECS: u64 = 30;
