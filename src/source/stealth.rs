//! Request fingerprint presented to the ticketing site.

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use tracing::warn;

use crate::config::BrowserConfig;

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Debug, Clone)]
pub struct StealthProfile {
    pub user_agent: String,
    pub locale: String,
    pub timezone: String,
    pub referer: String,
    pub platform: String,
}

impl StealthProfile {
    /// Profile for a new session. An unpinned user agent is drawn from the desktop pool.
    pub fn from_config(config: &BrowserConfig) -> Self {
        let user_agent = config
            .user_agent
            .clone()
            .or_else(|| {
                DESKTOP_USER_AGENTS
                    .choose(&mut rand::thread_rng())
                    .map(|ua| ua.to_string())
            })
            .unwrap_or_default();
        Self {
            user_agent: strip_headless(&user_agent),
            locale: config.locale.clone(),
            timezone: config.timezone.clone(),
            referer: config.referer.clone(),
            platform: config.platform.clone(),
        }
    }

    /// Default headers for every request of the session.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        self.insert(&mut headers, USER_AGENT, &self.user_agent);
        self.insert(&mut headers, ACCEPT_LANGUAGE, &accept_language(&self.locale));
        self.insert(&mut headers, REFERER, &self.referer);
        self.insert(
            &mut headers,
            HeaderName::from_static("sec-ch-ua-platform"),
            &format!("\"{}\"", self.platform),
        );
        headers.insert(HeaderName::from_static("sec-ch-ua-mobile"), HeaderValue::from_static("?0"));
        headers.insert(
            HeaderName::from_static("upgrade-insecure-requests"),
            HeaderValue::from_static("1"),
        );
        headers
    }

    fn insert(&self, headers: &mut HeaderMap, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(e) => warn!("Skipping header {}: {}", name, e),
        }
    }
}

/// Remove automation markers from a user agent string.
pub fn strip_headless(ua: &str) -> String {
    ua.replace("HeadlessChrome", "Chrome").replace("Headless", "")
}

/// `"en-US,en"` becomes `"en-US,en;q=0.9"`.
pub fn accept_language(locale: &str) -> String {
    locale
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, lang)| {
            if i == 0 {
                lang.to_string()
            } else {
                let q = (10usize.saturating_sub(i)).max(1);
                format!("{};q=0.{}", lang, q)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_marker_is_stripped() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 HeadlessChrome/124.0.0.0 Safari/537.36";
        assert!(!strip_headless(ua).contains("Headless"));
        assert!(strip_headless(ua).contains("Chrome/124"));
    }

    #[test]
    fn pinned_agent_wins_and_is_cleaned() {
        let config = BrowserConfig {
            user_agent: Some("HeadlessChrome/1.0".into()),
            ..BrowserConfig::default()
        };
        assert_eq!(StealthProfile::from_config(&config).user_agent, "Chrome/1.0");
    }

    #[test]
    fn rotated_agent_comes_from_pool() {
        let profile = StealthProfile::from_config(&BrowserConfig::default());
        assert!(DESKTOP_USER_AGENTS.contains(&profile.user_agent.as_str()));
    }

    #[test]
    fn headers_carry_locale_and_referer() {
        let profile = StealthProfile::from_config(&BrowserConfig::default());
        let headers = profile.headers();
        assert_eq!(headers.get(ACCEPT_LANGUAGE).unwrap(), "en-US,en;q=0.9");
        assert!(headers.get(REFERER).is_some());
        assert_eq!(headers.get("sec-ch-ua-platform").unwrap(), "\"Windows\"");
    }
}
