//! Per-message fold of protocol events into content blocks.
//!
//! A [`StreamSession`] owns the text buffer, the growing card set, and the
//! block list for one assistant reply. Events mutate it through
//! [`StreamSession::handle_event`]; the returned [`EventOutcome`] tells the
//! driver whether to publish new blocks, rearm the idle flush, or stop.

use tessera_content::extractor::{self, BlockAccumulator, ExtractMode};
use tessera_content::{CardKind, CardSet, ChartSpec, ContentBlock};
use tracing::{debug, warn};

use crate::protocol::ProtocolEvent;

/// Debounce window for flushing held-back buffer text, in milliseconds.
pub const STREAM_IDLE_FLUSH_MS: u64 = 150;

/// Shown when a stream fails without a usable error message.
pub const GENERIC_STREAM_ERROR: &str =
    "Something went wrong while generating the response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Request dispatched, no event seen yet.
    Sending,
    Streaming,
    Done,
    Error,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingStep {
    pub phase: Option<String>,
    pub content: String,
}

/// What a handled event changed, from the driver's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Dropped or had no visible effect.
    Ignored,
    ThinkingUpdated,
    /// Metadata merged; blocks may have changed through reprocessing.
    CardsMerged,
    BlocksExtended,
    /// Content delta buffered without releasing a block.
    ContentBuffered,
    Completed,
    Failed,
}

/// Everything a finished (or failed) session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedStream {
    pub blocks: Vec<ContentBlock>,
    pub cards: CardSet,
    pub content: String,
    pub thinking: Vec<ThinkingStep>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

/// Update published to whoever is rendering the reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Thinking(ThinkingStep),
    Blocks(Vec<ContentBlock>),
    Completed(FinishedStream),
    Failed { error: String, partial: FinishedStream },
}

#[derive(Debug)]
pub struct StreamSession {
    phase: SessionPhase,
    buffer: String,
    content: String,
    blocks: BlockAccumulator,
    cards: CardSet,
    thinking: Vec<ThinkingStep>,
    reprocessed: bool,
    conversation_id: Option<String>,
    message_id: Option<String>,
    error: Option<String>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Sending,
            buffer: String::new(),
            content: String::new(),
            blocks: BlockAccumulator::new(),
            cards: CardSet::new(),
            thinking: Vec::new(),
            reprocessed: false,
            conversation_id: None,
            message_id: None,
            error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        self.blocks.blocks()
    }

    pub fn blocks_snapshot(&self) -> Vec<ContentBlock> {
        self.blocks.snapshot()
    }

    pub fn cards(&self) -> &CardSet {
        &self.cards
    }

    pub fn thinking(&self) -> &[ThinkingStep] {
        &self.thinking
    }

    pub fn last_thinking(&self) -> Option<&ThinkingStep> {
        self.thinking.last()
    }

    /// Buffer text not yet released as a block.
    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn handle_event(&mut self, event: ProtocolEvent) -> EventOutcome {
        if self.phase.is_terminal() {
            warn!(phase = ?self.phase, "dropping event for a finished session");
            return EventOutcome::Ignored;
        }
        if self.phase == SessionPhase::Sending {
            self.phase = SessionPhase::Streaming;
        }
        match event {
            ProtocolEvent::Thinking { phase, content } => {
                self.thinking.push(ThinkingStep { phase, content });
                EventOutcome::ThinkingUpdated
            }
            ProtocolEvent::Metadata {
                data_cards,
                conversation_id,
                ..
            } => {
                if let Some(id) = conversation_id {
                    self.conversation_id = Some(id);
                }
                let carried_cards = !data_cards.is_empty();
                let added = self.cards.merge(data_cards);
                if added > 0 {
                    debug!(added, total = self.cards.len(), "merged metadata cards");
                }
                // One rescan of already emitted blocks per message, the first
                // time cards arrive while there is something to rescan.
                if carried_cards && !self.reprocessed && !self.blocks.is_empty() {
                    self.reprocessed = true;
                    self.reprocess_blocks();
                }
                self.extract_buffer(ExtractMode::Streaming);
                EventOutcome::CardsMerged
            }
            ProtocolEvent::Content { content } => {
                self.content.push_str(&content);
                self.buffer.push_str(&content);
                if self.extract_buffer(ExtractMode::Streaming) {
                    EventOutcome::BlocksExtended
                } else {
                    EventOutcome::ContentBuffered
                }
            }
            ProtocolEvent::ChartBlock { symbol, time_range } => {
                self.blocks
                    .push_block(ContentBlock::chart(ChartSpec::new(symbol, time_range)));
                EventOutcome::BlocksExtended
            }
            ProtocolEvent::ArticleBlock { card_id } => {
                match self.cards.find(CardKind::Article, &card_id).cloned() {
                    Some(card) => {
                        // Pending text must land before the article to keep
                        // reading order.
                        self.force_flush_buffer();
                        self.blocks.push_block(ContentBlock::article(card));
                        EventOutcome::BlocksExtended
                    }
                    None => {
                        debug!(card_id = %card_id, "dropping article block without a card");
                        EventOutcome::Ignored
                    }
                }
            }
            ProtocolEvent::ImageBlock { card_id } => {
                match self.cards.find(CardKind::Image, &card_id).cloned() {
                    Some(card) => {
                        self.blocks.push_block(ContentBlock::image(card));
                        EventOutcome::BlocksExtended
                    }
                    None => {
                        debug!(card_id = %card_id, "dropping image block without a card");
                        EventOutcome::Ignored
                    }
                }
            }
            ProtocolEvent::EventBlock { card_id } => {
                match self.cards.find(CardKind::Event, &card_id).cloned() {
                    Some(card) => {
                        self.blocks.push_block(ContentBlock::event(card));
                        EventOutcome::BlocksExtended
                    }
                    None => {
                        debug!(card_id = %card_id, "dropping event block without a card");
                        EventOutcome::Ignored
                    }
                }
            }
            ProtocolEvent::HorizontalRule => {
                self.blocks.push_block(ContentBlock::horizontal_rule());
                EventOutcome::BlocksExtended
            }
            ProtocolEvent::Done {
                conversation_id,
                message_id,
            } => {
                if let Some(id) = conversation_id {
                    self.conversation_id = Some(id);
                }
                if message_id.is_some() {
                    self.message_id = message_id;
                }
                self.force_flush_buffer();
                self.blocks.seal();
                self.phase = SessionPhase::Done;
                EventOutcome::Completed
            }
            ProtocolEvent::Error { error } => {
                let message = if error.trim().is_empty() {
                    GENERIC_STREAM_ERROR.to_string()
                } else {
                    error
                };
                warn!(error = %message, "stream reported an error");
                self.force_flush_buffer();
                self.blocks.seal();
                self.error = Some(message);
                self.phase = SessionPhase::Error;
                EventOutcome::Failed
            }
            ProtocolEvent::Unknown => {
                debug!("dropping stream event of unknown type");
                EventOutcome::Ignored
            }
        }
    }

    /// Debounce flush: releases short tails held back for lookahead. Returns
    /// whether blocks changed.
    pub fn flush_idle(&mut self) -> bool {
        if self.phase != SessionPhase::Streaming {
            return false;
        }
        self.extract_buffer(ExtractMode::IdleFlush)
    }

    /// Freezes the session where it is; pending buffer text stays unshown.
    pub fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = SessionPhase::Cancelled;
    }

    /// Terminal failure raised by the transport rather than the protocol.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        let reason = reason.into();
        warn!(error = %reason, "stream transport failed");
        self.force_flush_buffer();
        self.blocks.seal();
        self.error = Some(reason);
        self.phase = SessionPhase::Error;
    }

    pub fn into_finished(self) -> FinishedStream {
        let (blocks, _) = self.blocks.into_parts();
        FinishedStream {
            blocks,
            cards: self.cards,
            content: self.content,
            thinking: self.thinking,
            conversation_id: self.conversation_id,
            message_id: self.message_id,
        }
    }

    fn extract_buffer(&mut self, mode: ExtractMode) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let buffer = std::mem::take(&mut self.buffer);
        let remaining = extractor::extract_into(&buffer, &self.cards, mode, &mut self.blocks);
        let changed = remaining.len() != buffer.len();
        self.buffer = remaining;
        changed
    }

    fn force_flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let buffer = std::mem::take(&mut self.buffer);
        extractor::extract_all_into(&buffer, &self.cards, &mut self.blocks);
    }

    /// Re-parses every text block against the current card set, splicing in
    /// widget blocks where a marker has become resolvable. Unchanged blocks
    /// keep their ids.
    fn reprocess_blocks(&mut self) {
        let (blocks, tail_open) = std::mem::take(&mut self.blocks).into_parts();
        let tail_id = if tail_open {
            blocks.last().map(|block| block.id)
        } else {
            None
        };
        let mut rebuilt = Vec::with_capacity(blocks.len());
        let mut changed = false;
        for block in blocks {
            let replacement = match block.as_text() {
                Some(content) => {
                    let parsed = extractor::parse_complete(content, &self.cards);
                    let unchanged =
                        parsed.len() == 1 && parsed[0].as_text() == Some(content);
                    if unchanged { None } else { Some(parsed) }
                }
                None => None,
            };
            match replacement {
                Some(parts) => {
                    changed = true;
                    rebuilt.extend(parts);
                }
                None => rebuilt.push(block),
            }
        }
        if changed {
            debug!("reprocessed emitted blocks with newly arrived cards");
        }
        let still_open = tail_id.is_some() && rebuilt.last().map(|block| block.id) == tail_id;
        self.blocks = BlockAccumulator::from_parts(rebuilt, still_open);
    }
}
