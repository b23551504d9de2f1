//! Block marker grammar.
//!
//! Markers are bracketed directives embedded in reply text. Card markers
//! (`VIEW_ARTICLE`, `IMAGE_CARD`, `EVENT_CARD`) carry an id that must match a
//! [`DataCard`](crate::card::DataCard) before the marker can become a widget;
//! chart markers and `[HR]` resolve on their own.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const CHART_KEYWORD: &str = "VIEW_CHART";
pub const ARTICLE_KEYWORD: &str = "VIEW_ARTICLE";
pub const IMAGE_KEYWORD: &str = "IMAGE_CARD";
pub const EVENT_KEYWORD: &str = "EVENT_CARD";
pub const RULE_TOKEN: &str = "HR";

/// Range applied when a chart marker does not name one.
pub const DEFAULT_CHART_RANGE: &str = "1D";

const LEGACY_CHART_PREFIX: &str = "chart-";

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:(VIEW_CHART|VIEW_ARTICLE|IMAGE_CARD|EVENT_CARD):([^\]\r\n]+)|HR)\]")
        .expect("marker pattern compiles")
});

/// Symbol plus time range for an inline chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub symbol: String,
    pub time_range: String,
}

impl ChartSpec {
    pub fn new(symbol: impl AsRef<str>, time_range: impl AsRef<str>) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_uppercase(),
            time_range: time_range.as_ref().trim().to_uppercase(),
        }
    }

    /// Parses the payload of a `VIEW_CHART` marker.
    ///
    /// Accepts `SYMBOL:RANGE`, the legacy `chart-SYMBOL` form, and a bare
    /// symbol; the latter two fall back to [`DEFAULT_CHART_RANGE`].
    pub fn from_payload(payload: &str) -> Self {
        let payload = payload.trim();
        if let Some(symbol) = payload.strip_prefix(LEGACY_CHART_PREFIX) {
            return Self::new(symbol, DEFAULT_CHART_RANGE);
        }
        match payload.split_once(':') {
            Some((symbol, range)) if !range.trim().is_empty() => Self::new(symbol, range),
            Some((symbol, _)) => Self::new(symbol, DEFAULT_CHART_RANGE),
            None => Self::new(payload, DEFAULT_CHART_RANGE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Chart(ChartSpec),
    Article { id: String },
    Image { id: String },
    Event { id: String },
    HorizontalRule,
}

impl Marker {
    /// Whether this marker renders without a backing card.
    pub fn is_self_contained(&self) -> bool {
        matches!(self, Self::Chart(_) | Self::HorizontalRule)
    }
}

/// A marker located inside a larger text, with byte offsets of the bracketed
/// span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub start: usize,
    pub end: usize,
    pub marker: Marker,
}

/// Finds the earliest complete marker in `text`.
pub fn find_marker(text: &str) -> Option<MarkerMatch> {
    let captures = MARKER_PATTERN.captures(text)?;
    let whole = captures.get(0)?;
    let marker = match (captures.get(1), captures.get(2)) {
        (Some(keyword), Some(payload)) => build_marker(keyword.as_str(), payload.as_str()),
        _ => Marker::HorizontalRule,
    };
    Some(MarkerMatch {
        start: whole.start(),
        end: whole.end(),
        marker,
    })
}

/// Finds a marker sitting at the front of `text`, ignoring leading
/// whitespace.
pub fn marker_at_front(text: &str) -> Option<MarkerMatch> {
    let lead = text.len() - text.trim_start().len();
    find_marker(text).filter(|found| found.start == lead)
}

/// Whether the tail of a buffer could still grow into a marker, meaning an
/// unclosed `[` whose following text is consistent with a marker keyword.
pub fn could_begin_marker(tail: &str) -> bool {
    let Some(open) = tail.rfind('[') else {
        return false;
    };
    let after = &tail[open + 1..];
    if after.contains(']') {
        return false;
    }
    if after.is_empty() {
        return true;
    }
    const KEYWORDS: [&str; 5] = [
        CHART_KEYWORD,
        ARTICLE_KEYWORD,
        IMAGE_KEYWORD,
        EVENT_KEYWORD,
        RULE_TOKEN,
    ];
    KEYWORDS
        .iter()
        .any(|keyword| keyword.starts_with(after) || after.starts_with(keyword))
}

/// Whether a bare bracketed span (`[body]`) is actually marker syntax and so
/// must not be treated as a badge.
pub fn is_marker_body(body: &str) -> bool {
    if body == RULE_TOKEN {
        return true;
    }
    match body.split_once(':') {
        Some((keyword, payload)) => {
            !payload.is_empty()
                && matches!(
                    keyword,
                    CHART_KEYWORD | ARTICLE_KEYWORD | IMAGE_KEYWORD | EVENT_KEYWORD
                )
        }
        None => false,
    }
}

fn build_marker(keyword: &str, payload: &str) -> Marker {
    let id = payload.trim().to_string();
    match keyword {
        CHART_KEYWORD => Marker::Chart(ChartSpec::from_payload(payload)),
        ARTICLE_KEYWORD => Marker::Article { id },
        IMAGE_KEYWORD => Marker::Image { id },
        _ => Marker::Event { id },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn finds_chart_marker_with_range() {
        let found = find_marker("see [VIEW_CHART:TSLA:1M] today").expect("marker");
        assert_eq!(found.start, 4);
        assert_eq!(found.end, 24);
        assert_eq!(found.marker, Marker::Chart(ChartSpec::new("TSLA", "1M")));
    }

    #[test]
    fn chart_range_is_uppercased() {
        let found = find_marker("[VIEW_CHART:aapl:5d]").expect("marker");
        assert_eq!(found.marker, Marker::Chart(ChartSpec::new("AAPL", "5D")));
    }

    #[test]
    fn legacy_chart_payload_defaults_to_one_day() {
        assert_eq!(
            ChartSpec::from_payload("chart-AAPL"),
            ChartSpec::new("AAPL", "1D")
        );
        assert_eq!(
            ChartSpec::from_payload("MSFT"),
            ChartSpec::new("MSFT", "1D")
        );
    }

    #[test]
    fn finds_card_markers() {
        assert_eq!(
            find_marker("[VIEW_ARTICLE:abc-123]").map(|found| found.marker),
            Some(Marker::Article {
                id: "abc-123".into()
            })
        );
        assert_eq!(
            find_marker("[IMAGE_CARD:7]").map(|found| found.marker),
            Some(Marker::Image { id: "7".into() })
        );
        assert_eq!(
            find_marker("[EVENT_CARD:42]").map(|found| found.marker),
            Some(Marker::Event { id: "42".into() })
        );
    }

    #[test]
    fn finds_horizontal_rule() {
        assert_eq!(
            find_marker("before\n[HR]\nafter").map(|found| (found.start, found.marker)),
            Some((7, Marker::HorizontalRule))
        );
    }

    #[test]
    fn ignores_unknown_keywords_and_unclosed_brackets() {
        assert_eq!(find_marker("[VIEW_TABLE:x]"), None);
        assert_eq!(find_marker("[VIEW_CHART:TSLA"), None);
        assert_eq!(find_marker("plain text"), None);
    }

    #[test]
    fn payload_may_not_span_lines() {
        assert_eq!(find_marker("[VIEW_ARTICLE:a\nb]"), None);
    }

    #[test]
    fn marker_at_front_allows_leading_whitespace() {
        assert!(marker_at_front("  [HR] rest").is_some());
        assert!(marker_at_front("x [HR]").is_none());
    }

    #[test]
    fn tail_keyword_prefixes_are_recognized() {
        assert!(could_begin_marker("text ["));
        assert!(could_begin_marker("text [VIEW"));
        assert!(could_begin_marker("text [VIEW_CHART:TS"));
        assert!(could_begin_marker("text [H"));
        assert!(!could_begin_marker("text [note] done"));
        assert!(!could_begin_marker("no bracket"));
        assert!(!could_begin_marker("text [hello"));
    }

    #[test]
    fn marker_bodies_are_not_badges() {
        assert!(is_marker_body("HR"));
        assert!(is_marker_body("VIEW_CHART:TSLA:1D"));
        assert!(is_marker_body("EVENT_CARD:9"));
        assert!(!is_marker_body("Fed Meeting"));
        assert!(!is_marker_body("note:see below"));
    }
}
