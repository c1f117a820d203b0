use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid monitor: {0}")]
    InvalidMonitor(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Notification delivery failed: {0}")]
    Notify(String),

    #[error("Browser session unavailable: {0}")]
    SessionUnavailable(String),
}

impl WatchError {
    /// Persistence failures leave the monitor's last-run untouched so the poll is retried.
    pub fn is_persistence(&self) -> bool {
        matches!(self, WatchError::Database(_) | WatchError::Storage { .. })
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
