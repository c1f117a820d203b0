//! Headless Chromium driven over the DevTools protocol.
//!
//! Every session launches its own browser with a throwaway profile directory, so cookies
//! and storage never leak between monitors. The stealth profile is applied to the page
//! through CDP before the first navigation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{SetLocaleOverrideParams, SetTimezoneOverrideParams};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use chrono_tz::Tz;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::session::{BrowserSession, SessionFactory};
use super::stealth::{accept_language, StealthProfile};
use crate::config::BrowserConfig;
use crate::error::{Result, WatchError};

/// Hides the usual automation tells from page scripts.
pub(crate) const MASK_AUTOMATION: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

const WINDOW: (u32, u32) = (1366, 900);

static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn unavailable(e: impl std::fmt::Display) -> WatchError {
    WatchError::SessionUnavailable(e.to_string())
}

/// `navigator.platform` for a client-hint platform name.
pub(crate) fn navigator_platform(platform: &str) -> &'static str {
    match platform.to_ascii_lowercase().as_str() {
        "macos" | "mac" | "macintosh" => "MacIntel",
        "linux" => "Linux x86_64",
        _ => "Win32",
    }
}

/// First tag of a locale list: `"en-US,en"` gives `"en-US"`.
pub(crate) fn primary_locale(locale: &str) -> &str {
    locale
        .split(',')
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("en-US")
}

/// IANA id to hand to `Emulation.setTimezoneOverride`; `None` for names Chromium would reject.
pub(crate) fn timezone_override(timezone: &str) -> Option<String> {
    timezone.trim().parse::<Tz>().ok().map(|tz| tz.name().to_string())
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    current_url: String,
    html: String,
    alive: bool,
}

impl ChromeSession {
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let profile = StealthProfile::from_config(config);
        let profile_dir = std::env::temp_dir().join(format!(
            "showwatch-chrome-{}-{}",
            std::process::id(),
            PROFILE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let mut builder = LaunchConfig::builder()
            .no_sandbox()
            .window_size(WINDOW.0, WINDOW.1)
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .user_data_dir(&profile_dir)
            .arg(format!("--lang={}", primary_locale(&profile.locale)))
            .arg("--disable-blink-features=AutomationControlled");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let launch = builder.build().map_err(unavailable)?;

        let (browser, mut events) = Browser::launch(launch).await.map_err(unavailable)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("DevTools connection closed: {}", e);
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(unavailable)?;
        Self::apply(&page, &profile).await?;
        info!("Launched browser session with user agent {}", profile.user_agent);
        Ok(Self {
            browser,
            page,
            handler,
            profile_dir,
            current_url: String::new(),
            html: String::new(),
            alive: true,
        })
    }

    async fn apply(page: &Page, profile: &StealthProfile) -> Result<()> {
        let mut agent = SetUserAgentOverrideParams::new(profile.user_agent.clone());
        agent.accept_language = Some(accept_language(&profile.locale));
        agent.platform = Some(navigator_platform(&profile.platform).to_string());
        page.execute(agent).await.map_err(unavailable)?;

        let locale = SetLocaleOverrideParams {
            locale: Some(primary_locale(&profile.locale).to_string()),
        };
        if let Err(e) = page.execute(locale).await {
            warn!("Locale override rejected: {}", e);
        }

        match timezone_override(&profile.timezone) {
            Some(tz) => {
                page.execute(SetTimezoneOverrideParams::new(tz))
                    .await
                    .map_err(unavailable)?;
            }
            None => warn!("Unknown timezone '{}'; keeping the host zone", profile.timezone),
        }

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(MASK_AUTOMATION))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Copy the live document into the session.
    async fn capture(&mut self) {
        match self.page.content().await {
            Ok(html) => self.html = html,
            Err(e) => warn!("Could not read page content: {}", e),
        }
        if let Ok(Some(url)) = self.page.url().await {
            self.current_url = url;
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if let Err(e) = self.page.goto(url).await {
            self.alive = false;
            return Err(WatchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            });
        }
        self.capture().await;
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.page.reload().await.map_err(|e| WatchError::Navigation {
            url: self.current_url.clone(),
            message: e.to_string(),
        })?;
        self.capture().await;
        Ok(())
    }

    async fn settle(&mut self, wait: Duration) {
        tokio::time::sleep(wait).await;
        self.capture().await;
    }

    fn html(&self) -> String {
        self.html.clone()
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    async fn screenshot(&mut self) -> Option<Vec<u8>> {
        match self.page.screenshot(ScreenshotParams::builder().full_page(true).build()).await {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive && !self.handler.is_finished()
    }

    async fn close(&mut self) {
        self.alive = false;
        if let Err(e) = self.browser.close().await {
            debug!("Browser close: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait: {}", e);
        }
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!("Could not remove {}: {}", self.profile_dir.display(), e);
        }
    }
}

/// Launches one [`ChromeSession`] per call.
pub struct ChromeSessionFactory {
    config: BrowserConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(ChromeSession::launch(&self.config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_maps_to_navigator_value() {
        assert_eq!(navigator_platform("Windows"), "Win32");
        assert_eq!(navigator_platform("macOS"), "MacIntel");
        assert_eq!(navigator_platform("Linux"), "Linux x86_64");
    }

    #[test]
    fn primary_locale_is_first_tag() {
        assert_eq!(primary_locale("en-IN, en"), "en-IN");
        assert_eq!(primary_locale(""), "en-US");
    }

    #[test]
    fn only_known_timezones_are_overridden() {
        assert_eq!(timezone_override("Asia/Kolkata").as_deref(), Some("Asia/Kolkata"));
        assert_eq!(timezone_override(" UTC ").as_deref(), Some("UTC"));
        assert_eq!(timezone_override("Mars/Olympus"), None);
    }

    #[test]
    fn mask_hides_webdriver_flag() {
        assert!(MASK_AUTOMATION.contains("navigator, 'webdriver'"));
    }

    #[tokio::test]
    #[ignore = "launches a local Chromium"]
    async fn page_sees_the_overridden_timezone() {
        let config = BrowserConfig {
            timezone: "Asia/Kolkata".into(),
            ..BrowserConfig::default()
        };
        let mut session = ChromeSession::launch(&config).await.unwrap();
        session.navigate("data:text/html,<p>hi</p>").await.unwrap();

        let tz: String = session
            .page
            .evaluate("Intl.DateTimeFormat().resolvedOptions().timeZone")
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(tz, "Asia/Kolkata");
        let webdriver: Option<bool> = session
            .page
            .evaluate("navigator.webdriver")
            .await
            .unwrap()
            .into_value()
            .ok();
        assert_ne!(webdriver, Some(true));
        assert!(session.screenshot().await.is_some());
        session.close().await;
    }
}
