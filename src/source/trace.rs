use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Writes per-navigation HTML and screenshots for postmortem debugging.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    dir: PathBuf,
}

impl TraceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Best effort; failures are logged and swallowed.
    pub async fn write(&self, url: &str, html: &str, screenshot: Option<&[u8]>, at: DateTime<Utc>) {
        let stem = format!("{}_{}", at.format("%Y%m%dT%H%M%S%3f"), slug(url));
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Cannot create trace dir {}: {}", self.dir.display(), e);
            return;
        }
        let html_path = self.dir.join(format!("{}.html", stem));
        if let Err(e) = tokio::fs::write(&html_path, html).await {
            warn!("Cannot write trace {}: {}", html_path.display(), e);
        }
        if let Some(png) = screenshot {
            let png_path = self.dir.join(format!("{}.png", stem));
            if let Err(e) = tokio::fs::write(&png_path, png).await {
                warn!("Cannot write screenshot {}: {}", png_path.display(), e);
            }
        }
        debug!("Trace written to {}", html_path.display());
    }
}

/// Filesystem-safe tail of a URL.
fn slug(url: &str) -> String {
    let path = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let mut out: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    out = out.trim_matches('_').to_string();
    if out.len() > 80 {
        out = out[out.len() - 80..].to_string();
    }
    if out.is_empty() {
        "page".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_keeps_the_tail() {
        assert_eq!(slug("https://a.b/x/ET001/20250101?y=1"), "a_b_x_ET001_20250101");
        assert_eq!(slug("https://"), "page");
        assert!(slug(&format!("https://a.b/{}", "x".repeat(200))).len() <= 80);
    }

    #[tokio::test]
    async fn writes_html_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::new(dir.path().join("art"));
        writer
            .write("https://a.b/page", "<html></html>", Some(&[0x89, 0x50]), Utc::now())
            .await;
        let names: Vec<String> = std::fs::read_dir(writer.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.ends_with("_a_b_page.html")));
        assert!(names.iter().any(|n| n.ends_with(".png")));
    }
}
