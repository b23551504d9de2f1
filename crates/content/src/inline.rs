//! Inline span parsing for paragraph, heading, and list item text.
//!
//! Three passes run in order over the text segments that earlier passes have
//! not claimed: markdown links (classified into plain links and source
//! badges), bare bracketed badges, then emphasis. A span converted by one
//! pass is never rescanned by a later one, so a link label containing `**`
//! stays a link.

use std::sync::LazyLock;

use regex::Regex;

use crate::marker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSegment {
    Text(String),
    Bold(String),
    Italic(String),
    BoldItalic(String),
    Link { text: String, href: String },
    SourceBadge { label: String, href: String },
    Badge(String),
}

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]\n]+)\]\(([^()\s]+)\)").expect("link pattern compiles")
});

static BRACKET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]\n]+)\]").expect("bracket pattern compiles"));

static EMPHASIS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*\*([^*\n]+)\*\*\*|\*\*([^*\n]+)\*\*|\*([^*\n]+)\*")
        .expect("emphasis pattern compiles")
});

static FILING_FORM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(10-[QK]|8-K|S-\d+|DEF\s?14A|13F(?:-[A-Z]+)?|424B\d*)$")
        .expect("filing form pattern compiles")
});

const SOURCE_SITES: [&str; 12] = [
    "sec.gov",
    "reuters.com",
    "bloomberg.com",
    "wsj.com",
    "cnbc.com",
    "marketwatch.com",
    "seekingalpha.com",
    "fool.com",
    "benzinga.com",
    "businesswire.com",
    "prnewswire.com",
    "globenewswire.com",
];

/// Parses `text` into inline segments.
pub fn parse_inline(text: &str) -> Vec<InlineSegment> {
    let seed = vec![InlineSegment::Text(text.to_string())];
    let linked = map_text_segments(seed, link_pass);
    let badged = map_text_segments(linked, badge_pass);
    map_text_segments(badged, emphasis_pass)
}

fn map_text_segments(
    segments: Vec<InlineSegment>,
    pass: fn(&str) -> Vec<InlineSegment>,
) -> Vec<InlineSegment> {
    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            InlineSegment::Text(text) => out.extend(pass(&text)),
            other => out.push(other),
        }
    }
    out
}

fn link_pass(text: &str) -> Vec<InlineSegment> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for captures in LINK_PATTERN.captures_iter(text) {
        let (Some(whole), Some(label), Some(href)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        push_text(&mut out, &text[cursor..whole.start()]);
        let label = label.as_str();
        let href = href.as_str();
        if is_source_link(label, href) {
            out.push(InlineSegment::SourceBadge {
                label: label.trim().to_string(),
                href: href.to_string(),
            });
        } else {
            out.push(InlineSegment::Link {
                text: label.to_string(),
                href: href.to_string(),
            });
        }
        cursor = whole.end();
    }
    push_text(&mut out, &text[cursor..]);
    out
}

fn badge_pass(text: &str) -> Vec<InlineSegment> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for captures in BRACKET_PATTERN.captures_iter(text) {
        let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        // Marker syntax that survived extraction stays literal.
        if marker::is_marker_body(body.as_str()) {
            continue;
        }
        push_text(&mut out, &text[cursor..whole.start()]);
        out.push(InlineSegment::Badge(body.as_str().to_string()));
        cursor = whole.end();
    }
    push_text(&mut out, &text[cursor..]);
    out
}

fn emphasis_pass(text: &str) -> Vec<InlineSegment> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for captures in EMPHASIS_PATTERN.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_text(&mut out, &text[cursor..whole.start()]);
        if let Some(inner) = captures.get(1) {
            out.push(InlineSegment::BoldItalic(inner.as_str().to_string()));
        } else if let Some(inner) = captures.get(2) {
            out.push(InlineSegment::Bold(inner.as_str().to_string()));
        } else if let Some(inner) = captures.get(3) {
            out.push(InlineSegment::Italic(inner.as_str().to_string()));
        }
        cursor = whole.end();
    }
    push_text(&mut out, &text[cursor..]);
    out
}

fn push_text(out: &mut Vec<InlineSegment>, text: &str) {
    if !text.is_empty() {
        out.push(InlineSegment::Text(text.to_string()));
    }
}

fn is_source_link(label: &str, href: &str) -> bool {
    let trimmed = label.trim();
    if FILING_FORM_PATTERN.is_match(trimmed) {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered == "source" || lowered == "read more" {
        return true;
    }
    let href = href.to_ascii_lowercase();
    SOURCE_SITES.iter().any(|site| href.contains(site))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::InlineSegment::{Badge, Bold, BoldItalic, Italic, Link, SourceBadge, Text};
    use super::*;

    fn text(s: &str) -> InlineSegment {
        Text(s.to_string())
    }

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(parse_inline("just words"), vec![text("just words")]);
        assert_eq!(parse_inline(""), Vec::<InlineSegment>::new());
    }

    #[test]
    fn links_are_extracted() {
        assert_eq!(
            parse_inline("see [the docs](https://example.com/docs) for more"),
            vec![
                text("see "),
                Link {
                    text: "the docs".into(),
                    href: "https://example.com/docs".into()
                },
                text(" for more"),
            ]
        );
    }

    #[test]
    fn filing_forms_become_source_badges() {
        assert_eq!(
            parse_inline("[10-Q](https://example.com/f)"),
            vec![SourceBadge {
                label: "10-Q".into(),
                href: "https://example.com/f".into()
            }]
        );
        assert_eq!(
            parse_inline("[424B5](https://example.com/f)"),
            vec![SourceBadge {
                label: "424B5".into(),
                href: "https://example.com/f".into()
            }]
        );
    }

    #[test]
    fn source_domains_and_labels_become_source_badges() {
        assert_eq!(
            parse_inline("[Reuters](https://www.reuters.com/markets/x)"),
            vec![SourceBadge {
                label: "Reuters".into(),
                href: "https://www.reuters.com/markets/x".into()
            }]
        );
        assert_eq!(
            parse_inline("[Source](https://example.com/post)"),
            vec![SourceBadge {
                label: "Source".into(),
                href: "https://example.com/post".into()
            }]
        );
    }

    #[test]
    fn bare_brackets_become_badges() {
        assert_eq!(
            parse_inline("before [Fed Meeting] after"),
            vec![text("before "), Badge("Fed Meeting".into()), text(" after")]
        );
    }

    #[test]
    fn marker_syntax_is_not_badged() {
        assert_eq!(
            parse_inline("raw [VIEW_ARTICLE:a1] stays"),
            vec![text("raw [VIEW_ARTICLE:a1] stays")]
        );
        assert_eq!(parse_inline("[HR]"), vec![text("[HR]")]);
    }

    #[test]
    fn emphasis_levels() {
        assert_eq!(
            parse_inline("a *b* **c** ***d*** e"),
            vec![
                text("a "),
                Italic("b".into()),
                text(" "),
                Bold("c".into()),
                text(" "),
                BoldItalic("d".into()),
                text(" e"),
            ]
        );
    }

    #[test]
    fn unmatched_asterisks_stay_literal() {
        assert_eq!(parse_inline("grew **30"), vec![text("grew **30")]);
        assert_eq!(parse_inline("a * b"), vec![text("a * b")]);
    }

    #[test]
    fn link_labels_are_not_rescanned() {
        assert_eq!(
            parse_inline("[**bold label**](https://example.com)"),
            vec![Link {
                text: "**bold label**".into(),
                href: "https://example.com".into()
            }]
        );
    }

    #[test]
    fn badge_inside_bold_text() {
        assert_eq!(
            parse_inline("**strong [note] here**"),
            vec![
                text("**strong "),
                Badge("note".into()),
                text(" here**"),
            ]
        );
    }
}
