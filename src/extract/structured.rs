//! Primary strategy: venue cards embedded as JSON inside script payloads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::VenueListing;
use crate::showtime;

static CARD_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""type"\s*:\s*"venue-card""#).expect("card tag pattern is valid"));

/// How far before a card tag the opening brace may sit.
const MAX_LOOKBEHIND: usize = 16 * 1024;
/// Opening-brace candidates tried per tag before giving up.
const MAX_CANDIDATES: usize = 48;
/// Longest object the brace matcher will follow.
const MAX_OBJECT_LEN: usize = 256 * 1024;

const NAME_PATHS: &[&[&str]] = &[
    &["additionalData", "venueName"],
    &["venueName"],
    &["venue", "name"],
    &["name"],
    &["title"],
];

/// Venue cards found in `html`, in document order.
///
/// Payloads embedded inside JS string literals are escaped (`\"type\"`); those are
/// unescaped once and rescanned when the plain scan finds nothing.
pub fn venue_cards(html: &str) -> Vec<VenueListing> {
    let found = scan(html);
    if !found.is_empty() || !html.contains(r#"\"type\""#) {
        return found;
    }
    let unescaped = html.replace(r#"\""#, "\"");
    let found = scan(&unescaped);
    debug!("escaped venue-card rescan found {} card(s)", found.len());
    found
}

fn scan(text: &str) -> Vec<VenueListing> {
    let mut out = Vec::new();
    let mut covered_until = 0usize;
    for tag in CARD_TAG.find_iter(text) {
        // Tags nested in a card already taken belong to that card
        if tag.start() < covered_until {
            continue;
        }
        if let Some((card, end)) = enclosing_card(text, tag.start()) {
            if let Some(listing) = listing_from_card(&card) {
                out.push(listing);
            }
            covered_until = end;
        }
    }
    out
}

/// Innermost JSON object around `tag_start` whose own `type` is `venue-card`.
fn enclosing_card(text: &str, tag_start: usize) -> Option<(Value, usize)> {
    let bytes = text.as_bytes();
    let floor = tag_start.saturating_sub(MAX_LOOKBEHIND);
    let candidates = bytes[floor..tag_start]
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, b)| **b == b'{')
        .map(|(i, _)| floor + i)
        .take(MAX_CANDIDATES);

    for start in candidates {
        let Some(end) = matching_brace(bytes, start) else {
            continue;
        };
        if end <= tag_start {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) else {
            continue;
        };
        if value.get("type").and_then(Value::as_str) == Some("venue-card") {
            return Some((value, end));
        }
    }
    None
}

/// Index one past the `}` closing the object opened at `start`, skipping string literals.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let limit = bytes.len().min(start.saturating_add(MAX_OBJECT_LEN));

    for (offset, &b) in bytes[start..limit].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn listing_from_card(card: &Value) -> Option<VenueListing> {
    let venue = NAME_PATHS.iter().find_map(|path| {
        let mut cur = card;
        for key in *path {
            cur = cur.get(*key)?;
        }
        let name = cur.as_str()?.trim();
        (!name.is_empty()).then(|| name.to_string())
    })?;

    let mut labels = Vec::new();
    collect_times(card, &mut labels);
    Some(VenueListing::new(venue, labels))
}

fn collect_times(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(showtime::find_all(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_times(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_times(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cards_from_script_payloads() {
        let html = concat!(
            r#"<script>{"type":"venue-card","additionalData":{"venueName":"Cinema 1"},"#,
            r#""showtimes":[{"title":"10:00 AM"},{"title":"1:00 PM"}]}</script>"#,
            r#"<script>{"type":"venue-card","additionalData":{"venueName":"Cinema 2"},"#,
            r#""showtimes":[{"title":"2:00 PM"}]}</script>"#,
        );
        let cards = venue_cards(html);
        assert_eq!(
            cards,
            vec![
                VenueListing::new("Cinema 1", vec!["10:00 AM".into(), "1:00 PM".into()]),
                VenueListing::new("Cinema 2", vec!["2:00 PM".into()]),
            ]
        );
    }

    #[test]
    fn finds_cards_nested_in_larger_state() {
        let html = r#"<script>window.__STATE__ = {"page":{"widgets":[
            {"type":"banner","text":"Book {now}"},
            {"venue":{"name":"Grand"},"type":"venue-card","data":{"slots":["9:00 pm","11:15 PM"]}}
        ]}};</script>"#;
        let cards = venue_cards(html);
        assert_eq!(cards, vec![VenueListing::new("Grand", vec!["9:00 pm".into(), "11:15 PM".into()])]);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let html = r#"{"type":"venue-card","venueName":"Odd } Name {","showtimes":["7:00 PM"]}"#;
        let cards = venue_cards(html);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].venue, "Odd } Name {");
    }

    #[test]
    fn rescans_escaped_payloads() {
        let html = r#"<script>self.push("{\"type\":\"venue-card\",\"venueName\":\"Esc\",\"t\":\"6:45 PM\"}")</script>"#;
        let cards = venue_cards(html);
        assert_eq!(cards, vec![VenueListing::new("Esc", vec!["6:45 PM".into()])]);
    }

    #[test]
    fn malformed_cards_are_skipped() {
        let html = r#"<script>{"type":"venue-card","venueName":"Broken","showtimes":[</script>
            <script>{"type":"venue-card","showtimes":["1:00 PM"]}</script>"#;
        assert!(venue_cards(html).is_empty());
    }
}
