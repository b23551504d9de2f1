//! Incremental block extraction from a streaming text buffer.
//!
//! Each call scans the buffer front and peels off everything that is safe to
//! show: text up to the next marker, resolved markers as widget blocks, and
//! finished paragraphs. Whatever might still change stays in the returned
//! remainder: card markers whose card has not arrived, unclosed brackets or
//! emphasis, and short tails that could still grow into either.
//!
//! Text pieces are pushed through a [`BlockAccumulator`] so that pieces cut
//! from the same stretch of text merge back into a single text block. Running
//! the same discipline over a finished message ([`parse_complete`]) therefore
//! yields the same blocks a streamed session converged to.

use crate::block::{BlockPayload, ContentBlock};
use crate::card::{CardKind, CardSet};
use crate::marker::{self, Marker, MarkerMatch};

/// Clean tails shorter than this are held back while streaming.
pub const TAIL_HOLDBACK_MAX_LEN: usize = 20;

/// Upper bound on extraction passes per call. A buffer with more cuts than
/// this keeps the rest in the remainder for the next call.
const EXTRACT_PASS_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Apply every holdback rule.
    Streaming,
    /// Debounce flush: release short or slow-growing tails, but keep
    /// incomplete syntax and unresolved card markers deferred.
    IdleFlush,
    /// Stream completion: emit everything, unresolved markers as literal
    /// text. The remainder is always empty afterwards.
    Final,
}

/// Result of a standalone [`extract`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub blocks: Vec<ContentBlock>,
    pub remaining: String,
}

/// Orders blocks and merges adjacent text pieces into one block.
///
/// The newest text block stays open for appends until a widget is pushed or
/// the accumulator is sealed; ids of already pushed blocks never change.
#[derive(Debug, Default)]
pub struct BlockAccumulator {
    blocks: Vec<ContentBlock>,
    tail_open: bool,
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text_piece(&mut self, piece: &str) {
        if piece.is_empty() {
            return;
        }
        if self.tail_open {
            if let Some(BlockPayload::Text { content }) =
                self.blocks.last_mut().map(|block| &mut block.payload)
            {
                content.push_str(piece);
                return;
            }
        }
        // Whitespace between widgets never opens a block of its own.
        if piece.trim().is_empty() {
            return;
        }
        self.blocks.push(ContentBlock::text(piece));
        self.tail_open = true;
    }

    pub fn push_block(&mut self, block: ContentBlock) {
        self.tail_open = false;
        self.blocks.push(block);
    }

    /// Trims trailing whitespace off the open text tail, dropping the block
    /// if nothing is left. Called when a widget is about to follow.
    pub fn rtrim_open_text(&mut self) {
        if !self.tail_open {
            return;
        }
        let Some(last) = self.blocks.last_mut() else {
            return;
        };
        if let BlockPayload::Text { content } = &mut last.payload {
            let kept = content.trim_end().len();
            content.truncate(kept);
            if content.is_empty() {
                self.blocks.pop();
                self.tail_open = false;
            }
        }
    }

    /// Closes the open text tail; later text starts a new block.
    pub fn seal(&mut self) {
        self.tail_open = false;
    }

    pub fn is_tail_open(&self) -> bool {
        self.tail_open
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ContentBlock> {
        self.blocks.clone()
    }

    pub fn into_blocks(self) -> Vec<ContentBlock> {
        self.blocks
    }

    pub fn into_parts(self) -> (Vec<ContentBlock>, bool) {
        (self.blocks, self.tail_open)
    }

    pub fn from_parts(blocks: Vec<ContentBlock>, tail_open: bool) -> Self {
        let tail_open = tail_open
            && matches!(
                blocks.last().map(|block| &block.payload),
                Some(BlockPayload::Text { .. })
            );
        Self { blocks, tail_open }
    }
}

/// Runs one bounded extraction pass over `buffer`, pushing finished blocks
/// into `sink`. Returns the unconsumed remainder.
pub fn extract_into(
    buffer: &str,
    cards: &CardSet,
    mode: ExtractMode,
    sink: &mut BlockAccumulator,
) -> String {
    let mut rest = buffer;
    for _ in 0..EXTRACT_PASS_CAP {
        if rest.is_empty() {
            break;
        }
        let before_len = rest.len();
        match marker::find_marker(rest) {
            Some(MarkerMatch { start, end, marker }) => {
                match resolve_block(&marker, cards) {
                    Some(block) => {
                        sink.push_text_piece(&rest[..start]);
                        sink.rtrim_open_text();
                        sink.push_block(block);
                        rest = rest[end..].trim_start();
                    }
                    None if mode == ExtractMode::Final => {
                        // Unresolvable for good: keep it literal and move on.
                        sink.push_text_piece(&rest[..end]);
                        rest = &rest[end..];
                    }
                    None => {
                        // Card may still arrive; stop at the marker.
                        sink.push_text_piece(&rest[..start]);
                        return rest[start..].to_string();
                    }
                }
            }
            None => {
                if let Some(cut) = paragraph_cut(rest) {
                    sink.push_text_piece(&rest[..cut]);
                    rest = &rest[cut..];
                } else if tail_looks_incomplete(rest) {
                    if mode == ExtractMode::Final {
                        sink.push_text_piece(rest);
                        rest = "";
                    } else {
                        match safe_split_point(rest) {
                            Some(cut) => {
                                sink.push_text_piece(&rest[..cut]);
                                return rest[cut..].to_string();
                            }
                            None => return rest.to_string(),
                        }
                    }
                } else if mode == ExtractMode::Streaming
                    && (rest.trim().chars().count() < TAIL_HOLDBACK_MAX_LEN
                        || marker::could_begin_marker(rest))
                {
                    return rest.to_string();
                } else {
                    sink.push_text_piece(rest);
                    rest = "";
                }
            }
        }
        if rest.len() == before_len {
            break;
        }
    }
    rest.to_string()
}

/// Standalone extraction into a fresh accumulator.
pub fn extract(buffer: &str, cards: &CardSet, mode: ExtractMode) -> Extraction {
    let mut sink = BlockAccumulator::new();
    let remaining = extract_into(buffer, cards, mode, &mut sink);
    Extraction {
        blocks: sink.into_blocks(),
        remaining,
    }
}

/// Drains `text` completely in [`ExtractMode::Final`], looping past the pass
/// cap for arbitrarily long inputs.
pub fn extract_all_into(text: &str, cards: &CardSet, sink: &mut BlockAccumulator) {
    let mut rest = text.to_string();
    while !rest.is_empty() {
        let left = extract_into(&rest, cards, ExtractMode::Final, sink);
        if left.len() == rest.len() {
            sink.push_text_piece(&left);
            break;
        }
        rest = left;
    }
}

/// One-shot closure over a finished text: the block list a streamed session
/// converges to, computed directly.
pub fn parse_complete(text: &str, cards: &CardSet) -> Vec<ContentBlock> {
    let mut sink = BlockAccumulator::new();
    extract_all_into(text, cards, &mut sink);
    sink.into_blocks()
}

fn resolve_block(marker: &Marker, cards: &CardSet) -> Option<ContentBlock> {
    match marker {
        Marker::Chart(spec) => Some(ContentBlock::chart(spec.clone())),
        Marker::HorizontalRule => Some(ContentBlock::horizontal_rule()),
        Marker::Article { id } => cards
            .find(CardKind::Article, id)
            .cloned()
            .map(ContentBlock::article),
        Marker::Image { id } => cards
            .find(CardKind::Image, id)
            .cloned()
            .map(ContentBlock::image),
        Marker::Event { id } => cards
            .find(CardKind::Event, id)
            .cloned()
            .map(ContentBlock::event),
    }
}

/// Cut point after a blank line, extended over any extra newlines so the
/// remainder starts at content.
fn paragraph_cut(text: &str) -> Option<usize> {
    let split = text.find("\n\n")?;
    let bytes = text.as_bytes();
    let mut end = split + 2;
    while end < bytes.len() && matches!(bytes[end], b'\n' | b'\r') {
        end += 1;
    }
    Some(end)
}

fn tail_looks_incomplete(tail: &str) -> bool {
    has_unmatched_bracket(tail) || has_dangling_link_join(tail) || has_dangling_emphasis(tail)
}

fn has_unmatched_bracket(tail: &str) -> bool {
    match tail.rfind('[') {
        Some(open) => !tail[open + 1..].contains(']'),
        None => false,
    }
}

fn has_dangling_link_join(tail: &str) -> bool {
    match tail.rfind("](") {
        Some(join) => !tail[join + 2..].contains(')'),
        None => false,
    }
}

fn has_dangling_emphasis(tail: &str) -> bool {
    let stars = tail.matches('*').count();
    let doubles = tail.matches("**").count();
    stars % 2 == 1 || doubles % 2 == 1
}

/// Byte offset separating text that is certainly finished from the earliest
/// possibly-incomplete construct. `None` means the whole tail must be held.
fn safe_split_point(tail: &str) -> Option<usize> {
    let mut cut = usize::MAX;
    if has_unmatched_bracket(tail) {
        if let Some(open) = tail.rfind('[') {
            cut = cut.min(open);
        }
    }
    if has_dangling_link_join(tail) {
        if let Some(join) = tail.rfind("](") {
            cut = cut.min(tail[..join].rfind('[').unwrap_or(0));
        }
    }
    if has_dangling_emphasis(tail) {
        cut = cut.min(emphasis_split(tail));
    }
    if cut == 0 || cut == usize::MAX {
        return None;
    }
    if tail_looks_incomplete(&tail[..cut]) {
        return None;
    }
    Some(cut)
}

/// Start of the last asterisk run whose prefix has balanced emphasis.
fn emphasis_split(tail: &str) -> usize {
    let mut best = 0;
    let mut prev_star = false;
    for (index, ch) in tail.char_indices() {
        let is_star = ch == '*';
        if is_star && !prev_star && !has_dangling_emphasis(&tail[..index]) {
            best = index;
        }
        prev_star = is_star;
    }
    best
}
