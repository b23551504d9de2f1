#![deny(unsafe_code)]

//! Application core for a streamed market-research chat.
//!
//! Wires the content model (`tessera-content`) and the stream pipeline
//! (`tessera-stream`) into a conversation: sending a prompt, driving the
//! reply session, folding updates into messages, and rendering finished
//! blocks as plain text.

pub mod conversation;
pub mod format;
pub mod render;
pub mod service;
pub mod settings;

pub use conversation::{
    Conversation, ConversationId, Message, MessageId, MessageStatus, Role, StreamSessionId,
    StreamState, StreamTarget, StreamTransition, StreamTransitionRejection,
};
pub use render::{InteractionHandler, NoopInteractions, dispatch_click, render_blocks};
pub use service::{ChatService, ServiceError, ServiceResult};
pub use settings::{ChatSettings, SettingsError, SettingsStore};
