mod common;

use anyhow::Result;

use common::{quick_acquire, venue_page, FakeWeb, BLOCKED_PAGE};
use std::time::Duration;

use showwatch::source::{AcquireSettings, Degradation, PageSource, ResilientPageSource, TraceWriter};
use showwatch::WatchError;

const URL: &str = "https://in.bookmyshow.com/buytickets/cinema-night/ET00000001/20250101";

fn source(web: &FakeWeb) -> ResilientPageSource {
    ResilientPageSource::new(web.factory(), quick_acquire(), None)
}

#[tokio::test]
async fn session_is_created_once_and_reused() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, venue_page(&[("Cinema One", &["10:00 AM"])]));
    let mut source = source(&web);

    let first = source.open(URL).await?;
    let second = source.open(URL).await?;
    assert_eq!(first.final_url, URL);
    assert!(second.html.contains("Cinema One"));
    assert_eq!(first.title, "Buy tickets");
    assert_eq!(first.degradation, None);
    assert!(!first.rebuilt);
    assert_eq!(FakeWeb::count(&web.sessions_created), 1);
    Ok(())
}

#[tokio::test]
async fn dead_session_is_rebuilt_with_one_retry() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, venue_page(&[("Cinema One", &["10:00 AM"])]));
    let mut source = source(&web);
    source.open(URL).await?;

    web.fail_next_navigations(1);
    let page = source.open(URL).await?;
    assert!(page.rebuilt);
    assert!(page.html.contains("Cinema One"));
    assert_eq!(FakeWeb::count(&web.sessions_created), 2);
    assert_eq!(FakeWeb::count(&web.navigations), 3);
    Ok(())
}

#[tokio::test]
async fn second_navigation_failure_is_reported() {
    let web = FakeWeb::new();
    web.fail_next_navigations(2);
    let mut source = source(&web);

    let err = source.open(URL).await.unwrap_err();
    assert!(matches!(err, WatchError::Navigation { .. }));
    assert_eq!(FakeWeb::count(&web.navigations), 2);
}

#[tokio::test]
async fn unavailable_browser_is_a_session_error() {
    let web = FakeWeb::new();
    web.set_factory_down(true);
    let mut source = source(&web);

    let err = source.open(URL).await.unwrap_err();
    assert!(matches!(err, WatchError::SessionUnavailable(_)));
    assert_eq!(FakeWeb::count(&web.navigations), 0);
}

#[tokio::test]
async fn blocked_page_is_reloaded_exactly_once() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, BLOCKED_PAGE);
    let mut source = source(&web);

    let page = source.open(URL).await?;
    assert_eq!(page.degradation, Some(Degradation::Blocked));
    assert_eq!(FakeWeb::count(&web.reloads), 1);
    Ok(())
}

#[tokio::test]
async fn reload_recovers_a_challenge_page() -> Result<()> {
    let web = FakeWeb::new();
    web.serve_sequence(
        URL,
        vec![BLOCKED_PAGE.to_string(), venue_page(&[("Cinema One", &["10:00 AM"])])],
    );
    let mut source = source(&web);

    let page = source.open(URL).await?;
    assert_eq!(page.degradation, None);
    assert!(page.html.contains("Cinema One"));
    assert_eq!(FakeWeb::count(&web.reloads), 1);
    Ok(())
}

#[tokio::test]
async fn failed_reload_and_fallback_still_return_the_page() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, BLOCKED_PAGE);
    web.break_sessions_on_reload(true);
    let mut source = source(&web);

    let page = source.open(URL).await?;
    assert_eq!(page.degradation, Some(Degradation::Blocked));
    assert_eq!(FakeWeb::count(&web.reloads), 1);
    // The fallback navigation was attempted on the broken session
    assert_eq!(FakeWeb::count(&web.navigations), 2);

    // Next open rebuilds the dead session
    web.break_sessions_on_reload(false);
    source.open(URL).await?;
    assert_eq!(FakeWeb::count(&web.sessions_created), 2);
    Ok(())
}

/// Production blank thresholds, no waiting.
fn strict_source(web: &FakeWeb) -> ResilientPageSource {
    let settings = AcquireSettings {
        settle: Duration::ZERO,
        reload_backoff: Duration::ZERO,
        ..AcquireSettings::default()
    };
    ResilientPageSource::new(web.factory(), settings, None)
}

#[tokio::test]
async fn blank_render_is_reloaded_exactly_once() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, "<html><head><title>Buy tickets</title></head><body><div id=\"root\"></div></body></html>");
    let mut source = strict_source(&web);

    let page = source.open(URL).await?;
    assert_eq!(page.degradation, Some(Degradation::Blank));
    assert_eq!(FakeWeb::count(&web.reloads), 1);
    assert_eq!(FakeWeb::count(&web.navigations), 1);
    Ok(())
}

#[tokio::test]
async fn crash_page_recovers_on_reload() -> Result<()> {
    let web = FakeWeb::new();
    let crashed = "<html><body><h2>Oops! Something went wrong</h2><p>Please try again later.</p></body></html>";
    let rendered = format!(
        "<html><head><title>Buy tickets</title></head><body><p>{}</p></body></html>",
        "Cinema One 10:00 AM. ".repeat(20)
    );
    web.serve_sequence(URL, vec![crashed.to_string(), rendered]);
    let mut source = strict_source(&web);

    let page = source.open(URL).await?;
    assert_eq!(page.degradation, None);
    assert!(page.html.contains("Cinema One"));
    assert_eq!(FakeWeb::count(&web.reloads), 1);
    Ok(())
}

#[tokio::test]
async fn trace_writes_page_html() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let web = FakeWeb::new();
    web.serve(URL, venue_page(&[("Cinema One", &["10:00 AM"])]));
    let mut source = ResilientPageSource::new(
        web.factory(),
        quick_acquire(),
        Some(TraceWriter::new(dir.path().to_path_buf())),
    );

    source.open(URL).await?;
    let saved: Vec<_> = std::fs::read_dir(dir.path())?.collect::<std::io::Result<_>>()?;
    assert_eq!(saved.len(), 1);
    assert!(saved[0].file_name().to_string_lossy().ends_with(".html"));
    Ok(())
}

#[tokio::test]
async fn close_releases_the_session() -> Result<()> {
    let web = FakeWeb::new();
    web.serve(URL, venue_page(&[("Cinema One", &["10:00 AM"])]));
    let mut source = source(&web);
    source.open(URL).await?;
    source.close().await;
    assert_eq!(FakeWeb::count(&web.closes), 1);

    source.open(URL).await?;
    assert_eq!(FakeWeb::count(&web.sessions_created), 2);
    Ok(())
}
