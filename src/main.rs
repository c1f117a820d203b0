use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use showwatch::config::{seed_monitors, BrowserEngine, Config};
use showwatch::domain::MonitorState;
use showwatch::extract::extract;
use showwatch::notify::{FanoutSink, LogSink, NotificationSink, TelegramSink};
use showwatch::scheduler::{Scheduler, SchedulerSettings};
use showwatch::source::{ChromeSessionFactory, HttpSessionFactory, SessionFactory};
use showwatch::storage::{InMemoryStorage, SqliteStorage, Storage};
use showwatch::{logging, metrics};

#[derive(Parser)]
#[command(name = "showwatch")]
#[command(about = "Watches ticket pages and alerts when new showtimes open up")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop until interrupted
    Run {
        /// Keep all state in memory instead of the SQLite file
        #[arg(long)]
        memory: bool,
        /// Save HTML of every acquired page under the artifacts dir
        #[arg(long)]
        trace: bool,
    },
    /// Run the extractor on a saved HTML file and print what it finds
    Extract { file: PathBuf },
    /// List monitors
    List,
    /// Show venues recorded for a monitor
    Venues { id: String },
    /// Set a monitor's state (RUNNING, PAUSED, STOPPING, STOPPED, DISCOVER)
    State { id: String, state: MonitorState },
    /// Suppress polling for a number of minutes
    Snooze { id: String, minutes: i64 },
    /// Clear a snooze
    Unsnooze { id: String },
    /// Delete a monitor and everything recorded for it
    Delete { id: String },
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }
    warn!("Config file {} not found; using defaults", path.display());
    let mut config = Config::default();
    config.apply_env();
    Ok(config)
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = SqliteStorage::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path.display()))?;
    Ok(Arc::new(storage))
}

async fn run(config: Config, memory: bool) -> anyhow::Result<()> {
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    let storage: Arc<dyn Storage> = if memory {
        info!("Using in-memory storage; state is lost on exit");
        Arc::new(InMemoryStorage::new())
    } else {
        open_storage(&config)?
    };

    let settings = SchedulerSettings::from_config(&config)?;
    let now = Utc::now();
    let today = now.with_timezone(&settings.timezone).date_naive();
    seed_monitors(storage.as_ref(), &config.monitors, today, now).await?;

    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    match TelegramSink::from_config(&config.telegram)? {
        Some(telegram) => sinks.push(Arc::new(telegram)),
        None => warn!("No Telegram bot token configured; notifications go to the log only"),
    }
    let sink = Arc::new(FanoutSink::new(sinks));
    let factory: Arc<dyn SessionFactory> = match config.browser.engine {
        BrowserEngine::Chrome => Arc::new(ChromeSessionFactory::new(config.browser.clone())),
        BrowserEngine::Http => {
            warn!("Using the plain HTTP engine; client-rendered listings will not be seen");
            Arc::new(HttpSessionFactory::new(config.browser.clone()))
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            on_signal.cancel();
        }
    });

    let mut scheduler = Scheduler::new(storage, sink, factory, settings);
    scheduler.run(cancel).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { memory, trace } => {
            if trace {
                config.trace.enabled = true;
            }
            run(config, memory).await?;
        }
        Commands::Extract { file } => {
            let html = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let listings = extract(&html);
            println!("🏟  {} venue(s) in {}", listings.len(), file.display());
            for listing in listings {
                if listing.showtimes.is_empty() {
                    println!("   - {}: (no showtimes)", listing.venue);
                } else {
                    println!("   - {}: {}", listing.venue, listing.showtimes.join(", "));
                }
            }
        }
        Commands::List => {
            let storage = open_storage(&config)?;
            let monitors = storage.list_monitors().await?;
            if monitors.is_empty() {
                println!("No monitors.");
            }
            for m in monitors {
                println!(
                    "{} [{}] every {}s • {} • venues: {}",
                    m.id,
                    m.state,
                    m.interval_secs,
                    m.date_mode.describe(),
                    m.venues.describe()
                );
                println!("   {}", m.url);
                if let Some(last) = m.last_run {
                    println!("   last run {}", last.to_rfc3339());
                }
                if let Some(until) = m.snooze_until.filter(|u| *u > Utc::now()) {
                    println!("   snoozed until {}", until.to_rfc3339());
                }
            }
        }
        Commands::Venues { id } => {
            let storage = open_storage(&config)?;
            if storage.get_monitor(&id).await?.is_none() {
                bail!("No monitor named {}", id);
            }
            let venues = storage.indexed_venues(&id).await?;
            if venues.is_empty() {
                println!("No venues recorded for {} yet.", id);
            }
            for v in venues {
                println!("{}  {}  (last seen {})", v.date.format("%Y-%m-%d"), v.venue, v.last_seen.to_rfc3339());
            }
        }
        Commands::State { id, state } => {
            let storage = open_storage(&config)?;
            if !storage.set_state(&id, state, Utc::now()).await? {
                bail!("No monitor named {}", id);
            }
            println!("✅ {} is now {}", id, state);
        }
        Commands::Snooze { id, minutes } => {
            if minutes <= 0 {
                bail!("Snooze needs a positive number of minutes");
            }
            let storage = open_storage(&config)?;
            let now = Utc::now();
            let until = now + Duration::minutes(minutes);
            if !storage.set_snooze(&id, Some(until), now).await? {
                bail!("No monitor named {}", id);
            }
            println!("😴 {} snoozed until {}", id, until.to_rfc3339());
        }
        Commands::Unsnooze { id } => {
            let storage = open_storage(&config)?;
            if !storage.set_snooze(&id, None, Utc::now()).await? {
                bail!("No monitor named {}", id);
            }
            println!("⏰ {} unsnoozed", id);
        }
        Commands::Delete { id } => {
            let storage = open_storage(&config)?;
            if !storage.delete_monitor(&id).await? {
                bail!("No monitor named {}", id);
            }
            println!("🗑  {} deleted", id);
        }
    }
    Ok(())
}
