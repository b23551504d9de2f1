//! Ordered content blocks produced by extraction.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::card::DataCard;
use crate::marker::ChartSpec;

/// Stable identity of a block across re-renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    Text { content: String },
    Chart(ChartSpec),
    Article(DataCard),
    Image(DataCard),
    Event(DataCard),
    HorizontalRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Chart,
    Article,
    Image,
    Event,
    HorizontalRule,
}

/// One unit of a rendered reply. The payload never changes kind after
/// creation; streaming only ever appends to the text of the newest text
/// block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    pub id: BlockId,
    #[serde(flatten)]
    pub payload: BlockPayload,
}

impl ContentBlock {
    pub fn new(payload: BlockPayload) -> Self {
        Self {
            id: BlockId::generate(),
            payload,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(BlockPayload::Text {
            content: content.into(),
        })
    }

    pub fn chart(spec: ChartSpec) -> Self {
        Self::new(BlockPayload::Chart(spec))
    }

    pub fn article(card: DataCard) -> Self {
        Self::new(BlockPayload::Article(card))
    }

    pub fn image(card: DataCard) -> Self {
        Self::new(BlockPayload::Image(card))
    }

    pub fn event(card: DataCard) -> Self {
        Self::new(BlockPayload::Event(card))
    }

    pub fn horizontal_rule() -> Self {
        Self::new(BlockPayload::HorizontalRule)
    }

    pub fn kind(&self) -> BlockKind {
        match &self.payload {
            BlockPayload::Text { .. } => BlockKind::Text,
            BlockPayload::Chart(_) => BlockKind::Chart,
            BlockPayload::Article(_) => BlockKind::Article,
            BlockPayload::Image(_) => BlockKind::Image,
            BlockPayload::Event(_) => BlockKind::Event,
            BlockPayload::HorizontalRule => BlockKind::HorizontalRule,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            BlockPayload::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// Strips ids for payload-level comparison in tests and reprocessing.
pub fn payloads(blocks: &[ContentBlock]) -> Vec<&BlockPayload> {
    blocks.iter().map(|block| &block.payload).collect()
}
