use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tracing::{debug, instrument};

use super::session::{BrowserSession, SessionFactory};
use super::stealth::StealthProfile;
use crate::config::BrowserConfig;
use crate::error::{Result, WatchError};

/// Session over plain HTTP with a persistent cookie jar. Scripts never run, so pages that
/// render client-side come back as their server shell.
///
/// Block pages come back with 403/503 bodies; those are kept as the current document so the
/// page source can classify them.
pub struct HttpSession {
    client: Client,
    current_url: String,
    html: String,
    alive: bool,
}

impl HttpSession {
    pub fn build(config: &BrowserConfig) -> Result<Self> {
        let profile = StealthProfile::from_config(config);
        let client = Client::builder()
            .cookie_store(true)
            .default_headers(profile.headers())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .deflate(true)
            .build()?;
        debug!("Built HTTP session with user agent {}", profile.user_agent);
        Ok(Self {
            client,
            current_url: String::new(),
            html: String::new(),
            alive: true,
        })
    }

    async fn fetch(&mut self, url: &str, bypass_cache: bool) -> Result<()> {
        let mut request = self.client.get(url);
        if bypass_cache {
            request = request
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                self.alive = false;
                return Err(WatchError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
        };
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            self.alive = false;
            WatchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!(%status, bytes = body.len(), "fetched {}", final_url);
        self.current_url = final_url;
        self.html = body;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.fetch(url, false).await
    }

    async fn reload(&mut self) -> Result<()> {
        let url = self.current_url.clone();
        if url.is_empty() {
            return Err(WatchError::Navigation {
                url,
                message: "nothing loaded to reload".to_string(),
            });
        }
        self.fetch(&url, true).await
    }

    fn html(&self) -> String {
        self.html.clone()
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn close(&mut self) {
        self.alive = false;
        self.html.clear();
    }
}

/// Builds [`HttpSession`]s, each with a fresh cookie jar and fingerprint.
pub struct HttpSessionFactory {
    config: BrowserConfig,
}

impl HttpSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession::build(&self.config)?))
    }
}
