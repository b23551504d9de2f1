//! Plain-text renderer and the interaction seam.
//!
//! Widget blocks render as one-line placeholders; text blocks go through the
//! document parser so headings, lists, and resolved markers come out the same
//! way a widget renderer would see them. Interaction callbacks are pass-through
//! only: this layer never interprets a click.

use tessera_content::document::{ListItem, RenderNode, parse_document};
use tessera_content::{BlockPayload, CardSet, ContentBlock, DataCard, InlineSegment};

use crate::format::{card_caption, chart_caption};

/// Callbacks a host embeds for widget interactions. All default to no-ops.
pub trait InteractionHandler {
    fn ticker_clicked(&self, _symbol: &str) {}
    fn image_clicked(&self, _card: &DataCard) {}
    fn event_clicked(&self, _card: &DataCard) {}
}

/// Handler that ignores every interaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInteractions;

impl InteractionHandler for NoopInteractions {}

/// Routes a click on a block to the matching handler callback.
pub fn dispatch_click(block: &ContentBlock, handler: &dyn InteractionHandler) {
    match &block.payload {
        BlockPayload::Chart(spec) => handler.ticker_clicked(&spec.symbol),
        BlockPayload::Image(card) => handler.image_clicked(card),
        BlockPayload::Event(card) => handler.event_clicked(card),
        BlockPayload::Text { .. } | BlockPayload::Article(_) | BlockPayload::HorizontalRule => {}
    }
}

/// Renders finished blocks as a plain-text transcript.
pub fn render_blocks(blocks: &[ContentBlock], cards: &CardSet) -> String {
    let mut sections = Vec::new();
    for block in blocks {
        match &block.payload {
            BlockPayload::Text { content } => {
                for node in parse_document(content, cards) {
                    sections.push(render_node(&node));
                }
            }
            BlockPayload::Chart(spec) => {
                sections.push(format!("[chart {}]", chart_caption(spec)));
            }
            BlockPayload::Article(card) => {
                sections.push(format!("[article {}]", card_caption(card)));
            }
            BlockPayload::Image(card) => {
                sections.push(format!("[image {}]", card_caption(card)));
            }
            BlockPayload::Event(card) => {
                sections.push(format!("[event {}]", card_caption(card)));
            }
            BlockPayload::HorizontalRule => sections.push("---".to_string()),
        }
    }
    sections.join("\n\n")
}

fn render_node(node: &RenderNode) -> String {
    match node {
        RenderNode::Paragraph { segments, indented } => {
            let text = segments_text(segments);
            if *indented {
                format!("  {text}")
            } else {
                text
            }
        }
        RenderNode::Heading { level, segments } => {
            format!(
                "{} {}",
                "#".repeat(usize::from(*level)),
                segments_text(segments)
            )
        }
        RenderNode::List { items } => items
            .iter()
            .map(render_list_item)
            .collect::<Vec<_>>()
            .join("\n"),
        RenderNode::Chart(spec) => format!("[chart {}]", chart_caption(spec)),
        RenderNode::Article(card) => format!("[article {}]", card_caption(card)),
        RenderNode::Image(card) => format!("[image {}]", card_caption(card)),
        RenderNode::Event(card) => format!("[event {}]", card_caption(card)),
        RenderNode::Rule => "---".to_string(),
    }
}

fn render_list_item(item: &ListItem) -> String {
    let text = segments_text(&item.segments);
    match item.ordinal {
        Some(ordinal) => format!("{ordinal}. {text}"),
        None => format!("- {text}"),
    }
}

// Emphasis drops to plain text; links keep their label only.
fn segments_text(segments: &[InlineSegment]) -> String {
    let mut text = String::new();
    for segment in segments {
        match segment {
            InlineSegment::Text(value)
            | InlineSegment::Bold(value)
            | InlineSegment::Italic(value)
            | InlineSegment::BoldItalic(value)
            | InlineSegment::Badge(value) => text.push_str(value),
            InlineSegment::Link { text: label, .. }
            | InlineSegment::SourceBadge { label, .. } => text.push_str(label),
        }
    }
    text
}
