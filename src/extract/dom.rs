//! Fallback strategy: structural rows in the rendered markup.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::VenueListing;
use crate::showtime;

static ROW_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        ".ReactVirtualized__Grid__innerScrollContainer > div",
        r#"[data-testid="venue-card"]"#,
        ".venue-card",
        ".theatre-card",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("row selector is valid"))
    .collect()
});

static NAME_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "a[data-venue-code]",
        "h3",
        "h4",
        "a",
        ".venue-name",
        ".theatre-name",
        r#"[class*="name"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("name selector is valid"))
    .collect()
});

/// Rows from the first row selector that yields any named venue.
pub fn venue_rows(html: &str) -> Vec<VenueListing> {
    let document = Html::parse_document(html);
    for selector in ROW_SELECTORS.iter() {
        let rows: Vec<VenueListing> = document
            .select(selector)
            .filter_map(|row| {
                let venue = row_name(&row)?;
                let labels = showtime::find_all(&joined_text(&row));
                Some(VenueListing::new(venue, labels))
            })
            .collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// First name-bearing child; a child whose text is itself a showtime is not a name.
fn row_name(row: &ElementRef<'_>) -> Option<String> {
    NAME_SELECTORS.iter().find_map(|selector| {
        row.select(selector).find_map(|el| {
            let text = joined_text(&el);
            (!text.is_empty() && !showtime::contains_time(&text)).then_some(text)
        })
    })
}

/// Text nodes joined with single spaces so adjacent cells never fuse.
fn joined_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
