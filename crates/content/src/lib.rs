#![deny(unsafe_code)]

//! Content model for streamed assistant replies.
//!
//! A reply arrives as markdown text with inline block markers such as
//! `[VIEW_CHART:TSLA:1D]` or `[HR]` woven through it. This crate turns that
//! text into an ordered list of [`ContentBlock`]s, either incrementally while
//! the text is still streaming ([`extractor`]) or in one pass over a finished
//! message ([`parse_complete`]). Rendering a text block into paragraphs,
//! headings, lists, and inline spans is handled by [`document`].

pub mod block;
pub mod card;
/// Line and paragraph level parsing of finished text.
pub mod document;
pub mod extractor;
/// Inline span parsing: links, badges, emphasis.
pub mod inline;
pub mod marker;

pub use block::{BlockId, BlockKind, BlockPayload, ContentBlock};
pub use card::{CardKind, CardSet, DataCard};
pub use document::{ListItem, RenderNode, parse_document};
pub use extractor::{
    BlockAccumulator, ExtractMode, Extraction, TAIL_HOLDBACK_MAX_LEN, extract, extract_all_into,
    extract_into, parse_complete,
};
pub use inline::{InlineSegment, parse_inline};
pub use marker::{ChartSpec, Marker, MarkerMatch, find_marker, marker_at_front};
