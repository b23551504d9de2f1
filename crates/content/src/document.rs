//! Line level parsing of finished text into render nodes.
//!
//! The input here is the text of one content block, already free of any
//! marker the extractor could resolve. Whatever markers remain are resolved
//! against the card set a second time, so text parsed straight from a
//! finished message renders the same way as text that streamed through the
//! extractor.

use std::sync::LazyLock;

use regex::Regex;

use crate::card::{CardKind, CardSet, DataCard};
use crate::inline::{InlineSegment, parse_inline};
use crate::marker::{self, ChartSpec, Marker};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderNode {
    Paragraph {
        segments: Vec<InlineSegment>,
        indented: bool,
    },
    Heading {
        level: u8,
        segments: Vec<InlineSegment>,
    },
    List {
        items: Vec<ListItem>,
    },
    Chart(ChartSpec),
    Article(DataCard),
    Image(DataCard),
    Event(DataCard),
    Rule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub ordinal: Option<u32>,
    pub segments: Vec<InlineSegment>,
}

static BOLD_LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*[^*\n]+\*\*$").expect("bold line pattern compiles"));

static NUMBERED_TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\s+\*\*[^*\n]+\*\*$").expect("numbered title pattern compiles")
});

static READ_MORE_TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(?:\[read more\]\([^()\s]*\)|read more)\s*\)\s*$")
        .expect("read more pattern compiles")
});

const MAX_SUBHEADING_CHARS: usize = 100;

/// Parses `text` into an ordered list of render nodes.
pub fn parse_document(text: &str, cards: &CardSet) -> Vec<RenderNode> {
    let mut builder = DocumentBuilder::new(cards);
    for line in text.lines() {
        builder.push_line(line);
    }
    builder.finish()
}

struct DocumentBuilder<'a> {
    cards: &'a CardSet,
    nodes: Vec<RenderNode>,
    paragraph: Vec<String>,
    list: Vec<PendingItem>,
    after_list: bool,
    pending_images: Vec<DataCard>,
}

struct PendingItem {
    ordinal: Option<u32>,
    text: String,
}

enum WidgetAction {
    Immediate(RenderNode),
    QueueImage(DataCard),
    Literal,
}

impl<'a> DocumentBuilder<'a> {
    fn new(cards: &'a CardSet) -> Self {
        Self {
            cards,
            nodes: Vec::new(),
            paragraph: Vec::new(),
            list: Vec::new(),
            after_list: false,
            pending_images: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.flush_paragraph();
            self.flush_list();
            self.after_list = false;
            return;
        }
        if let Some((level, rest)) = heading_of(trimmed) {
            self.flush_paragraph();
            self.flush_list();
            self.after_list = false;
            self.nodes.push(RenderNode::Heading {
                level,
                segments: parse_inline(rest),
            });
            return;
        }
        if is_bold_subheading(trimmed) || NUMBERED_TITLE_PATTERN.is_match(trimmed) {
            self.flush_paragraph();
            self.flush_list();
            self.after_list = false;
            self.nodes.push(RenderNode::Heading {
                level: 3,
                segments: parse_inline(trimmed),
            });
            return;
        }
        if let Some((ordinal, rest)) = list_item_of(trimmed) {
            self.push_list_item(ordinal, rest);
            return;
        }
        if line.starts_with("  ") && !self.list.is_empty() && marker::find_marker(line).is_none() {
            if let Some(item) = self.list.last_mut() {
                item.text.push(' ');
                item.text.push_str(trimmed);
            }
            return;
        }
        if self.push_marker_line(trimmed) {
            return;
        }
        self.flush_list();
        self.paragraph.push(trimmed.to_string());
    }

    /// Handles a line carrying at least one marker that resolves to a widget.
    /// Text around immediate widgets is split into separate paragraphs; image
    /// markers are queued and rendered after the surrounding paragraph;
    /// unresolved markers stay in the text untouched.
    fn push_marker_line(&mut self, line: &str) -> bool {
        let mut probe = line;
        let mut actionable = false;
        while let Some(found) = marker::find_marker(probe) {
            if !matches!(self.widget_for(&found.marker), WidgetAction::Literal) {
                actionable = true;
                break;
            }
            probe = &probe[found.end..];
        }
        if !actionable {
            return false;
        }

        self.flush_list();
        let mut rest = line;
        let mut carried = String::new();
        while let Some(found) = marker::find_marker(rest) {
            match self.widget_for(&found.marker) {
                WidgetAction::Immediate(node) => {
                    carried.push_str(&rest[..found.start]);
                    if !carried.trim().is_empty() {
                        self.paragraph.push(carried.trim().to_string());
                    }
                    carried.clear();
                    self.flush_paragraph();
                    self.nodes.push(node);
                }
                WidgetAction::QueueImage(card) => {
                    carried.push_str(&rest[..found.start]);
                    self.pending_images.push(card);
                }
                WidgetAction::Literal => {
                    carried.push_str(&rest[..found.end]);
                }
            }
            rest = &rest[found.end..];
        }
        carried.push_str(rest);
        if !carried.trim().is_empty() {
            self.paragraph.push(carried.trim().to_string());
        }
        true
    }

    fn widget_for(&self, found: &Marker) -> WidgetAction {
        match found {
            Marker::Chart(spec) => WidgetAction::Immediate(RenderNode::Chart(spec.clone())),
            Marker::HorizontalRule => WidgetAction::Immediate(RenderNode::Rule),
            Marker::Article { id } => match self.cards.find(CardKind::Article, id) {
                Some(card) => WidgetAction::Immediate(RenderNode::Article(card.clone())),
                None => WidgetAction::Literal,
            },
            Marker::Event { id } => match self.cards.find(CardKind::Event, id) {
                Some(card) => WidgetAction::Immediate(RenderNode::Event(card.clone())),
                None => WidgetAction::Literal,
            },
            Marker::Image { id } => match self.cards.find(CardKind::Image, id) {
                Some(card) => WidgetAction::QueueImage(card.clone()),
                None => WidgetAction::Literal,
            },
        }
    }

    /// Adds a list item. A card marker inside the item is stripped from the
    /// item text; the list is then closed and the widget emitted directly
    /// after it.
    fn push_list_item(&mut self, ordinal: Option<u32>, text: &str) {
        self.flush_paragraph();
        let mut cleaned = String::new();
        let mut widgets = Vec::new();
        let mut rest = text;
        while let Some(found) = marker::find_marker(rest) {
            let resolved = match &found.marker {
                Marker::Article { id } => self
                    .cards
                    .find(CardKind::Article, id)
                    .cloned()
                    .map(RenderNode::Article),
                Marker::Image { id } => self
                    .cards
                    .find(CardKind::Image, id)
                    .cloned()
                    .map(RenderNode::Image),
                Marker::Event { id } => self
                    .cards
                    .find(CardKind::Event, id)
                    .cloned()
                    .map(RenderNode::Event),
                Marker::Chart(_) | Marker::HorizontalRule => None,
            };
            match resolved {
                Some(node) => {
                    cleaned.push_str(&rest[..found.start]);
                    widgets.push(node);
                }
                None => cleaned.push_str(&rest[..found.end]),
            }
            rest = &rest[found.end..];
        }
        cleaned.push_str(rest);
        self.list.push(PendingItem {
            ordinal,
            text: normalize_ws(&cleaned),
        });
        if !widgets.is_empty() {
            self.flush_list();
            self.nodes.extend(widgets);
        }
    }

    fn flush_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            let joined = self.paragraph.join(" ");
            self.paragraph.clear();
            let stripped = strip_read_more_trailer(&joined);
            let normalized = normalize_ws(&stripped);
            if !normalized.is_empty() {
                self.nodes.push(RenderNode::Paragraph {
                    segments: parse_inline(&normalized),
                    indented: self.after_list,
                });
            }
        }
        for card in self.pending_images.drain(..) {
            self.nodes.push(RenderNode::Image(card));
        }
    }

    fn flush_list(&mut self) {
        if self.list.is_empty() {
            return;
        }
        let items = self
            .list
            .drain(..)
            .map(|item| ListItem {
                ordinal: item.ordinal,
                segments: parse_inline(&item.text),
            })
            .collect();
        self.nodes.push(RenderNode::List { items });
        self.after_list = true;
    }

    fn finish(mut self) -> Vec<RenderNode> {
        self.flush_paragraph();
        self.flush_list();
        self.nodes
    }
}

fn heading_of(trimmed: &str) -> Option<(u8, &str)> {
    let hashes = trimmed.bytes().take_while(|byte| *byte == b'#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = trimmed[hashes..].strip_prefix(' ')?;
    Some((hashes as u8, rest.trim_start()))
}

fn is_bold_subheading(trimmed: &str) -> bool {
    trimmed.chars().count() < MAX_SUBHEADING_CHARS && BOLD_LINE_PATTERN.is_match(trimmed)
}

fn list_item_of(trimmed: &str) -> Option<(Option<u32>, &str)> {
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("\u{2022} "))
    {
        return Some((None, rest.trim_start()));
    }
    let digits = trimmed
        .bytes()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    let rest = trimmed[digits..].strip_prefix(". ")?;
    let ordinal = trimmed[..digits].parse::<u32>().ok()?;
    Some((Some(ordinal), rest.trim_start()))
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_read_more_trailer(text: &str) -> String {
    READ_MORE_TRAILER.replace(text, "").trim_end().to_string()
}
