//! Show extraction: raw HTML in, `(venue, [showtime])` pairs out.
//!
//! Two strategies are combined. Embedded venue-card JSON is read first; rendered rows are
//! scanned whenever that yields nothing or leaves a venue without showtimes. Output keeps
//! discovery order. Nothing here touches the network and nothing here fails: elements that
//! cannot be read are skipped.

mod dom;
mod structured;

use serde::Serialize;
use tracing::debug;

use crate::domain::normalize;
use crate::showtime;

pub use dom::venue_rows;
pub use structured::venue_cards;

/// One venue and the showtime labels seen for it, in page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VenueListing {
    pub venue: String,
    pub showtimes: Vec<String>,
}

impl VenueListing {
    /// Duplicate labels (same canonical time) collapse onto the first occurrence.
    pub fn new(venue: impl Into<String>, showtimes: Vec<String>) -> Self {
        let mut listing = Self {
            venue: venue.into(),
            showtimes: Vec::with_capacity(showtimes.len()),
        };
        listing.absorb(showtimes);
        listing
    }

    fn absorb(&mut self, labels: impl IntoIterator<Item = String>) {
        for label in labels {
            let key = showtime::canonicalize(&label);
            let dup = self
                .showtimes
                .iter()
                .any(|existing| match (&key, showtime::canonicalize(existing)) {
                    (Some(k), Some(e)) => *k == e,
                    _ => *existing == label,
                });
            if !dup {
                self.showtimes.push(label);
            }
        }
    }
}

/// Extract venue listings from a rendered page.
pub fn extract(html: &str) -> Vec<VenueListing> {
    let primary = collapse(venue_cards(html));
    let needs_fallback = primary.is_empty() || primary.iter().any(|l| l.showtimes.is_empty());
    if !needs_fallback {
        debug!("extracted {} venue(s) from embedded cards", primary.len());
        return primary;
    }

    let fallback = collapse(venue_rows(html));
    debug!(
        "embedded cards gave {} venue(s); row scan gave {}",
        primary.len(),
        fallback.len()
    );
    merge(primary, fallback)
}

/// Fold repeated venues (hydration payloads often carry a card twice) into one entry.
fn collapse(listings: Vec<VenueListing>) -> Vec<VenueListing> {
    let mut out: Vec<VenueListing> = Vec::with_capacity(listings.len());
    for listing in listings {
        let key = normalize(&listing.venue);
        match out.iter_mut().find(|l| normalize(&l.venue) == key) {
            Some(existing) => existing.absorb(listing.showtimes),
            None => out.push(listing),
        }
    }
    out
}

/// Prefer whichever side has showtimes for a venue; append venues only the fallback saw.
fn merge(mut primary: Vec<VenueListing>, fallback: Vec<VenueListing>) -> Vec<VenueListing> {
    for candidate in fallback {
        let key = normalize(&candidate.venue);
        match primary.iter_mut().find(|l| normalize(&l.venue) == key) {
            Some(existing) => {
                if existing.showtimes.is_empty() && !candidate.showtimes.is_empty() {
                    existing.showtimes = candidate.showtimes;
                }
            }
            None => primary.push(candidate),
        }
    }
    primary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_card_lists_are_filled_from_rows() {
        let html = concat!(
            r#"<script>{"type":"venue-card","additionalData":{"venueName":"Cinema 1"},"showtimes":[]}</script>"#,
            r#"<div class="ReactVirtualized__Grid__innerScrollContainer">"#,
            "<div><h3>Cinema 1</h3><span>10:00 AM</span></div>",
            "</div>"
        );
        assert_eq!(extract(html), vec![VenueListing::new("Cinema 1", vec!["10:00 AM".into()])]);
    }

    #[test]
    fn richer_card_list_wins_over_rows() {
        let html = concat!(
            r#"<script>{"type":"venue-card","venueName":"A","showtimes":["1:00 PM","4:00 PM"]}</script>"#,
            r#"<script>{"type":"venue-card","venueName":"B","showtimes":[]}</script>"#,
            r#"<div class="venue-card"><h3>A</h3><span>1:00 PM</span></div>"#,
            r#"<div class="venue-card"><h3>C</h3><span>8:00 PM</span></div>"#,
        );
        let listings = extract(html);
        assert_eq!(
            listings,
            vec![
                VenueListing::new("A", vec!["1:00 PM".into(), "4:00 PM".into()]),
                VenueListing::new("B", vec![]),
                VenueListing::new("C", vec!["8:00 PM".into()]),
            ]
        );
    }

    #[test]
    fn duplicate_labels_collapse() {
        let listing = VenueListing::new("X", vec!["10:00 AM".into(), "10:00AM".into(), "11:00 AM".into()]);
        assert_eq!(listing.showtimes, vec!["10:00 AM", "11:00 AM"]);
    }

    #[test]
    fn unrecognizable_markup_yields_nothing() {
        assert!(extract("<html><body><p>Nothing here</p></body></html>").is_empty());
        assert!(extract("").is_empty());
    }
}
