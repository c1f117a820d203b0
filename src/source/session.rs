use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Node, Selector};

use crate::error::Result;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("title selector is valid"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector is valid"));

/// One live page-rendering session, owned by a single monitor.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url`. An error means the session is dead and must be rebuilt.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Reload the current page in place, bypassing caches.
    async fn reload(&mut self) -> Result<()>;

    /// Give client-side rendering `wait` to finish before the document is read.
    async fn settle(&mut self, wait: Duration) {
        tokio::time::sleep(wait).await;
    }

    /// Markup of the current document.
    fn html(&self) -> String;

    fn current_url(&self) -> String;

    fn title(&self) -> String {
        document_title(&self.html())
    }

    /// Length of the visible body text.
    fn rendered_text_len(&self) -> usize {
        rendered_text_len(&self.html())
    }

    /// PNG capture of the viewport, when the session can render one.
    async fn screenshot(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn is_alive(&self) -> bool;

    async fn close(&mut self);
}

/// Builds fresh sessions; used at first use and after a session dies.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn BrowserSession>>;
}

pub fn document_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Characters of visible body text, ignoring `<script>`, `<style>` and `<noscript>`.
///
/// Walks the tree with an explicit stack; hostile pages can nest arbitrarily deep.
pub fn rendered_text_len(html: &str) -> usize {
    let doc = Html::parse_document(html);
    let Some(body) = doc.select(&BODY).next() else {
        return 0;
    };
    let mut len = 0;
    let mut pending: Vec<_> = body.children().collect();
    while let Some(node) = pending.pop() {
        match node.value() {
            Node::Text(text) => len += text.trim().chars().count(),
            Node::Element(e) if matches!(e.name(), "script" | "style" | "noscript") => {}
            Node::Element(_) => pending.extend(node.children()),
            _ => {}
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_trimmed() {
        assert_eq!(document_title("<html><head><title> Hello </title></head></html>"), "Hello");
        assert_eq!(document_title("<p>no title</p>"), "");
    }

    #[test]
    fn script_text_is_not_rendered() {
        let html = "<html><body><script>var x = 'long long long';</script><div>abc <b>de</b></div></body></html>";
        assert_eq!(rendered_text_len(html), 5);
    }

    #[test]
    fn deeply_nested_page_is_measured() {
        let depth = 60_000;
        let html = format!(
            "<html><body>{}deep<noscript>hidden</noscript>{}</body></html>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        assert_eq!(rendered_text_len(&html), 4);
    }
}
