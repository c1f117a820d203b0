//! Page source provider: rendered HTML for a URL, despite blocks, blank renders and dead
//! sessions.

mod chrome;
mod http;
mod provider;
mod session;
mod stealth;
mod trace;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use chrome::{ChromeSession, ChromeSessionFactory};
pub use http::{HttpSession, HttpSessionFactory};
pub use provider::{assess, AcquireSettings, ResilientPageSource};
pub use session::{document_title, rendered_text_len, BrowserSession, SessionFactory};
pub use stealth::{accept_language, strip_headless, StealthProfile};
pub use trace::TraceWriter;

/// Why an accepted page may be incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Degradation {
    /// Challenge or block interstitial.
    Blocked,
    /// Near-empty render or client-side crash page.
    Blank,
}

/// A loaded page.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub requested_url: String,
    pub final_url: String,
    pub html: String,
    pub title: String,
    pub degradation: Option<Degradation>,
    /// The session died on this navigation and was rebuilt.
    pub rebuilt: bool,
}

/// Source of rendered pages for one monitor. Not shared: each poll owns its source.
#[async_trait]
pub trait PageSource: Send {
    /// Errors are scoped to this call: `SessionUnavailable` when no session could be built,
    /// `Navigation` when the rebuilt session also failed to load the page.
    async fn open(&mut self, url: &str) -> Result<PageHandle>;

    /// Release the underlying session.
    async fn close(&mut self);
}
