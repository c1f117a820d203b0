use serde::{Deserialize, Serialize};

/// Which venues a monitor alerts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "lowercase")]
pub enum VenueFilter {
    /// Wildcard: every venue on the page.
    Any,
    /// Configured names, matched with [`normalize`]d bidirectional substring tests.
    Names(Vec<String>),
}

impl VenueFilter {
    /// Build a filter from operator input. An empty list, `"any"` or `"*"` means everything.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty()
            || names
                .iter()
                .any(|n| n.eq_ignore_ascii_case("any") || n == "*")
        {
            VenueFilter::Any
        } else {
            VenueFilter::Names(names)
        }
    }

    /// True when `venue` is covered by the filter.
    ///
    /// A configured name that is a substring of a longer venue name matches it (and vice
    /// versa), so "PVR" also matches "PVR Koramangala".
    pub fn matches(&self, venue: &str) -> bool {
        match self {
            VenueFilter::Any => true,
            VenueFilter::Names(names) => {
                let n = normalize(venue);
                if n.is_empty() {
                    return false;
                }
                names
                    .iter()
                    .map(|t| normalize(t))
                    .filter(|t| !t.is_empty())
                    .any(|t| n.contains(&t) || t.contains(&n))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            VenueFilter::Any => "any".to_string(),
            VenueFilter::Names(names) => format!("{} venue(s)", names.len()),
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            VenueFilter::Any => &[],
            VenueFilter::Names(names) => names,
        }
    }
}

/// Lowercase and keep only alphanumerics, so punctuation and spacing never affect matching.
pub fn normalize(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}
