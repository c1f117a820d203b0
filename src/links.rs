//! URL helpers: per-date page URLs and human titles for messages.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::compact_date;

static MOVIE_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/movies/[^/]+/([^/?#]+)").expect("slug pattern is valid"));
static EVENT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(ET\d{5,})").expect("code pattern is valid"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").expect("separator pattern is valid"));
static FORMAT_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(Imax|3d|4dx)\b").expect("token pattern is valid"));

/// Page URL for one show date: `<url>/YYYYMMDD`.
///
/// A trailing 8-digit segment is treated as an existing date and replaced.
pub fn ensure_date_in_url(url: &str, date: NaiveDate) -> String {
    let (base, suffix) = match url.find(|c| c == '?' || c == '#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    let trimmed = base.trim_end_matches('/');
    let stem = match trimmed.rsplit_once('/') {
        Some((head, last)) if last.len() == 8 && last.chars().all(|c| c.is_ascii_digit()) => head,
        _ => trimmed,
    };
    format!("{}/{}{}", stem, compact_date(date), suffix)
}

/// Booking link for one date: the canonical buy page when the URL carries an event code.
pub fn deeplink(url: &str, date: NaiveDate) -> String {
    match EVENT_CODE.captures(url).and_then(|c| c.get(1)) {
        Some(code) => format!("https://in.bookmyshow.com/buytickets/{}/{}", code.as_str(), compact_date(date)),
        None => ensure_date_in_url(url, date),
    }
}

/// Best-effort event title: the movie slug, else the event code, else `"Event"`.
pub fn event_title_from_url(url: &str) -> String {
    if let Some(slug) = MOVIE_SLUG.captures(url).and_then(|c| c.get(1)) {
        let words = SEPARATORS.replace_all(slug.as_str(), " ");
        let title = words
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ");
        if !title.is_empty() {
            return FORMAT_TOKENS
                .replace_all(&title, |c: &regex::Captures<'_>| c[0].to_uppercase())
                .into_owned();
        }
    }
    if let Some(code) = EVENT_CODE.captures(url).and_then(|c| c.get(1)) {
        return code.as_str().to_string();
    }
    "Event".to_string()
}

/// Prefix a message with the event title.
pub fn titled(url: &str, text: &str) -> String {
    format!("🎬 {}\n{}", event_title_from_url(url), text)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
