//! Backend abstraction that turns a chat request into a stream of raw
//! transcript chunks.
//!
//! Chunks are byte slices of the wire transcript with no framing guarantees;
//! [`crate::framing::FrameDecoder`] reassembles them downstream. Cancelling or
//! dropping a [`ChunkStream`] stops the feeding worker.

use futures::StreamExt;
use serde::Serialize;
use snafu::{Snafu, ensure};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("chat endpoint is not configured"))]
    MissingEndpoint,

    #[snafu(display("chat request rejected during {stage}: {reason}"))]
    RequestRejected { stage: &'static str, reason: String },

    #[snafu(display("chat stream failed during {stage}: {reason}"))]
    StreamFailed { stage: &'static str, reason: String },

    #[snafu(display("scripted backend has an empty transcript"))]
    EmptyTranscript,
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior exchange carried as request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            conversation_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw transcript bytes, cut anywhere.
    Chunk(String),
    /// Transport-level failure; no further chunks will arrive.
    Failed { reason: String },
}

/// Receiving half of a backend stream. Dropping it cancels the worker.
#[derive(Debug)]
pub struct ChunkStream {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ChunkStream {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel_tx.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Builds the channel pair a backend worker feeds into.
pub fn make_chunk_stream() -> (
    mpsc::UnboundedSender<TransportEvent>,
    ChunkStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let stream = ChunkStream {
        events,
        cancel_tx: Some(cancel_tx),
    };
    (event_tx, stream, cancel_rx)
}

/// A running backend stream: the chunk receiver plus its worker task.
#[derive(Debug)]
pub struct BackendStreamHandle {
    pub stream: ChunkStream,
    pub worker: JoinHandle<()>,
}

pub trait ChatBackend: Send + Sync {
    fn label(&self) -> &str;

    /// Starts streaming a reply. The worker owns the transport and exits on
    /// cancel or exhaustion.
    fn open_stream(&self, request: ChatRequest) -> TransportResult<BackendStreamHandle>;
}

const DEFAULT_CHUNK_LEN: usize = 16;

/// Replays a prerecorded wire transcript, cut into fixed-size chunks.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    transcript: String,
    chunk_len: usize,
}

impl ScriptedBackend {
    /// Wraps each JSON frame in `data: ...\n\n` wire framing.
    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut transcript = String::new();
        for frame in frames {
            transcript.push_str("data: ");
            transcript.push_str(frame.as_ref());
            transcript.push_str("\n\n");
        }
        Self {
            transcript,
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }

    pub fn from_transcript(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }

    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }
}

impl ChatBackend for ScriptedBackend {
    fn label(&self) -> &str {
        "scripted"
    }

    fn open_stream(&self, request: ChatRequest) -> TransportResult<BackendStreamHandle> {
        ensure!(
            !request.prompt.trim().is_empty(),
            RequestRejectedSnafu {
                stage: "validate",
                reason: "empty prompt",
            }
        );
        ensure!(!self.transcript.is_empty(), EmptyTranscriptSnafu);

        let chunks = split_chunks(&self.transcript, self.chunk_len);
        let (events, stream, mut cancel_rx) = make_chunk_stream();
        let worker = tokio::spawn(async move {
            let mut feed = futures::stream::iter(chunks);
            loop {
                tokio::select! {
                    // Cancellation wins over a ready chunk.
                    biased;
                    _ = &mut cancel_rx => {
                        debug!("scripted stream cancelled");
                        break;
                    }
                    chunk = feed.next() => match chunk {
                        Some(chunk) => {
                            if events.send(TransportEvent::Chunk(chunk)).is_err() {
                                break;
                            }
                            tokio::task::yield_now().await;
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(BackendStreamHandle { stream, worker })
    }
}

fn split_chunks(text: &str, len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = rest.len().min(len);
        while !rest.is_char_boundary(cut) {
            cut += 1;
        }
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn scripted_backend_replays_the_whole_transcript() {
        let backend = ScriptedBackend::from_frames([
            r#"{"type":"content","content":"hello"}"#,
            r#"{"type":"done"}"#,
        ])
        .with_chunk_len(7);
        let mut handle = backend
            .open_stream(ChatRequest::new("hi"))
            .unwrap();

        let mut received = String::new();
        while let Some(event) = handle.stream.recv().await {
            match event {
                TransportEvent::Chunk(chunk) => received.push_str(&chunk),
                TransportEvent::Failed { reason } => panic!("unexpected failure: {reason}"),
            }
        }
        assert_eq!(
            received,
            "data: {\"type\":\"content\",\"content\":\"hello\"}\n\ndata: {\"type\":\"done\"}\n\n"
        );
        handle.worker.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_the_feed_early() {
        let backend =
            ScriptedBackend::from_transcript("abcdefghij".repeat(10)).with_chunk_len(1);
        let mut handle = backend.open_stream(ChatRequest::new("hi")).unwrap();

        let first = handle.stream.recv().await;
        assert_eq!(first, Some(TransportEvent::Chunk("a".into())));
        handle.stream.cancel();
        handle.worker.await.unwrap();

        let mut leftover = 0;
        while let Some(TransportEvent::Chunk(chunk)) = handle.stream.recv().await {
            leftover += chunk.len();
        }
        assert!(leftover < 99, "cancel should stop the feed, got {leftover} more bytes");
    }

    #[tokio::test]
    async fn dropping_the_stream_fires_cancel() {
        let (_events, stream, cancel_rx) = make_chunk_stream();
        drop(stream);
        assert!(cancel_rx.await.is_ok());
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let backend = ScriptedBackend::from_transcript("data: {}\n\n");
        let err = backend
            .open_stream(ChatRequest::new("   "))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::RequestRejected { .. }));
    }

    #[test]
    fn empty_transcript_is_rejected() {
        let backend = ScriptedBackend::from_transcript("");
        let err = backend
            .open_stream(ChatRequest::new("hi"))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::EmptyTranscript));
    }

    #[test]
    fn request_serializes_with_camel_case_fields() {
        let request = ChatRequest::new("What moved today?")
            .with_history(vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")])
            .with_conversation_id("c-9");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["prompt"], "What moved today?");
        assert_eq!(json["conversationId"], "c-9");
        assert_eq!(json["history"][1]["role"], "assistant");

        let bare = serde_json::to_value(ChatRequest::new("hi")).unwrap();
        assert!(bare.get("history").is_none());
        assert!(bare.get("conversationId").is_none());
    }
}
