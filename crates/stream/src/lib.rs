#![deny(unsafe_code)]

//! Streaming pipeline between a chat backend and the content model.
//!
//! Wire chunks enter through a [`transport::ChunkStream`], are cut into
//! protocol events by [`framing::FrameDecoder`], folded into blocks by a
//! [`session::StreamSession`], and surfaced to the caller as
//! [`session::SessionUpdate`]s by the worker in [`driver`].

pub mod driver;
pub mod framing;
/// Wire events for one streamed reply.
pub mod protocol;
pub mod session;
pub mod transport;

pub use driver::{SessionHandle, SessionStream, spawn_session, spawn_session_with_debounce};
pub use framing::FrameDecoder;
pub use protocol::ProtocolEvent;
pub use session::{
    EventOutcome, FinishedStream, GENERIC_STREAM_ERROR, STREAM_IDLE_FLUSH_MS, SessionPhase,
    SessionUpdate, StreamSession, ThinkingStep,
};
pub use transport::{
    BackendStreamHandle, ChatBackend, ChatRequest, ChatTurn, ChunkStream, ScriptedBackend,
    TransportError, TransportEvent, TransportResult, TurnRole, make_chunk_stream,
};
