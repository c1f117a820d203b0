use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::session::{BrowserSession, SessionFactory};
use super::trace::TraceWriter;
use super::{Degradation, PageHandle, PageSource};
use crate::config::BrowserConfig;
use crate::constants::{BLOCK_BODY_SIGNATURES, BLOCK_TITLE_SIGNATURES, OOPS_SIGNATURES};
use crate::error::{Result, WatchError};
use crate::metrics;

/// Timing and thresholds for one acquisition.
#[derive(Debug, Clone)]
pub struct AcquireSettings {
    pub settle: Duration,
    pub reload_backoff: Duration,
    pub blank_text_threshold: usize,
    pub blank_html_threshold: usize,
}

impl From<&BrowserConfig> for AcquireSettings {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            settle: Duration::from_millis(config.settle_ms),
            reload_backoff: Duration::from_millis(config.reload_backoff_ms),
            blank_text_threshold: config.blank_text_threshold,
            blank_html_threshold: config.blank_html_threshold,
        }
    }
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

/// Classify a loaded page.
pub fn assess(html: &str, title: &str, text_len: usize, settings: &AcquireSettings) -> Option<Degradation> {
    let title = title.to_lowercase();
    let body = html.to_lowercase();
    if BLOCK_TITLE_SIGNATURES.iter().any(|s| title.contains(s))
        || BLOCK_BODY_SIGNATURES.iter().any(|s| body.contains(s))
    {
        return Some(Degradation::Blocked);
    }
    let near_empty = text_len < settings.blank_text_threshold && html.len() < settings.blank_html_threshold;
    if near_empty || OOPS_SIGNATURES.iter().any(|s| body.contains(s)) {
        return Some(Degradation::Blank);
    }
    None
}

/// Page source that rebuilds dead sessions and reloads degraded pages once.
pub struct ResilientPageSource {
    factory: Arc<dyn SessionFactory>,
    session: Option<Box<dyn BrowserSession>>,
    settings: AcquireSettings,
    tracer: Option<TraceWriter>,
}

impl ResilientPageSource {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: AcquireSettings, tracer: Option<TraceWriter>) -> Self {
        Self {
            factory,
            session: None,
            settings,
            tracer,
        }
    }

    async fn fresh_session(factory: &dyn SessionFactory) -> Result<Box<dyn BrowserSession>> {
        factory.create().await.map_err(|e| {
            metrics::page::acquired("failed");
            WatchError::SessionUnavailable(e.to_string())
        })
    }

    async fn live_session(&mut self) -> Result<&mut Box<dyn BrowserSession>> {
        let reusable = self.session.as_ref().map_or(false, |s| s.is_alive());
        if !reusable {
            if let Some(mut old) = self.session.take() {
                old.close().await;
            }
            let session = Self::fresh_session(self.factory.as_ref()).await?;
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| WatchError::SessionUnavailable("session missing after build".to_string()))
    }

    /// Navigate, rebuilding the session and retrying once if it turns out to be dead.
    async fn navigate(&mut self, url: &str) -> Result<bool> {
        let first = self.live_session().await?.navigate(url).await;
        let Err(e) = first else {
            return Ok(false);
        };

        warn!("Navigation failed ({}); rebuilding session", e);
        if let Some(mut dead) = self.session.take() {
            dead.close().await;
        }
        let session = Self::fresh_session(self.factory.as_ref()).await?;
        let session = self.session.insert(session);
        if let Err(e) = session.navigate(url).await {
            metrics::page::acquired("failed");
            return Err(e);
        }
        Ok(true)
    }
}

#[async_trait]
impl PageSource for ResilientPageSource {
    #[instrument(skip(self))]
    async fn open(&mut self, url: &str) -> Result<PageHandle> {
        let started = Instant::now();
        let rebuilt = self.navigate(url).await?;

        let settings = self.settings.clone();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| WatchError::SessionUnavailable("session lost after navigation".to_string()))?;
        session.settle(settings.settle).await;

        let mut degradation = assess(&session.html(), &session.title(), session.rendered_text_len(), &settings);
        if let Some(kind) = degradation {
            info!(?kind, "Page degraded; reloading once");
            if let Err(e) = session.reload().await {
                debug!("Reload failed ({}); navigating again", e);
                if let Err(e) = session.navigate(url).await {
                    warn!("Fallback navigation to {} failed: {}", url, e);
                }
            }
            session.settle(settings.reload_backoff).await;
            degradation = assess(&session.html(), &session.title(), session.rendered_text_len(), &settings);
            if let Some(kind) = degradation {
                warn!(?kind, "Accepting degraded page for {}", url);
            }
        }

        let handle = PageHandle {
            requested_url: url.to_string(),
            final_url: session.current_url(),
            html: session.html(),
            title: session.title(),
            degradation,
            rebuilt,
        };

        if let Some(tracer) = &self.tracer {
            let shot = session.screenshot().await;
            tracer.write(url, &handle.html, shot.as_deref(), Utc::now()).await;
        }

        metrics::page::load_duration(started.elapsed().as_secs_f64());
        metrics::page::acquired(match (degradation, rebuilt) {
            (Some(_), _) => "degraded",
            (None, true) => "rebuilt",
            (None, false) => "ok",
        });
        Ok(handle)
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            debug!("Page session released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AcquireSettings {
        AcquireSettings {
            settle: Duration::ZERO,
            reload_backoff: Duration::ZERO,
            blank_text_threshold: 200,
            blank_html_threshold: 5000,
        }
    }

    #[test]
    fn near_empty_render_is_blank() {
        let html = "<html><body><div id=\"root\"></div></body></html>";
        assert_eq!(assess(html, "", 0, &settings()), Some(Degradation::Blank));
    }

    #[test]
    fn blank_needs_both_thresholds() {
        let large = format!("<html><body>{}</body></html>", "<div class=\"slot\"></div>".repeat(400));
        assert!(large.len() >= 5000);
        assert_eq!(assess(&large, "Buy tickets", 10, &settings()), None);

        let short_but_wordy = "x".repeat(300);
        assert_eq!(assess(&short_but_wordy, "Buy tickets", 300, &settings()), None);
    }

    #[test]
    fn crash_marker_is_blank_regardless_of_size() {
        let html = format!(
            "<html><body><h1>Oops! Something went wrong</h1>{}</body></html>",
            "<p>filler text</p>".repeat(600)
        );
        assert_eq!(assess(&html, "BookMyShow", 5000, &settings()), Some(Degradation::Blank));
    }

    #[test]
    fn block_signatures_win_over_blank() {
        assert_eq!(
            assess("<html></html>", "Just a moment...", 0, &settings()),
            Some(Degradation::Blocked)
        );
        assert_eq!(
            assess("<p>Sorry, you have been blocked</p>", "", 0, &settings()),
            Some(Degradation::Blocked)
        );
    }

    #[test]
    fn page_source_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let factory: Arc<dyn SessionFactory> = Arc::new(crate::source::HttpSessionFactory::new(BrowserConfig::default()));
        let mut source = ResilientPageSource::new(factory, settings(), None);
        let open = source.open("http://127.0.0.1:9/");
        assert_send(&open);
    }
}
