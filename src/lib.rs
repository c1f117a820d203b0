pub mod config;
pub mod constants;
pub mod dedup;
pub mod error;
pub mod links;
pub mod logging;
pub mod metrics;
pub mod showtime;

// Domain data shapes shared across layers
pub mod domain;

pub mod extract;
pub mod notify;
pub mod scheduler;
pub mod source;
pub mod storage;

pub use config::Config;
pub use domain::{DateMode, Monitor, MonitorState, TimeWindow, VenueFilter};
pub use error::{Result, WatchError};
pub use scheduler::{Scheduler, SchedulerSettings, TickSummary};
pub use storage::{InMemoryStorage, SqliteStorage, Storage};
