//! Worker task that drives one streamed reply end to end.
//!
//! [`spawn_session`] couples a transport [`ChunkStream`] to a fresh
//! [`StreamSession`] and publishes [`SessionUpdate`]s as blocks materialize.
//! The debounce timer releases held-back buffer text after
//! [`STREAM_IDLE_FLUSH_MS`] of transport silence.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};
use tracing::debug;

use crate::framing::FrameDecoder;
use crate::protocol::ProtocolEvent;
use crate::session::{
    EventOutcome, GENERIC_STREAM_ERROR, STREAM_IDLE_FLUSH_MS, SessionPhase, SessionUpdate,
    StreamSession,
};
use crate::transport::{ChunkStream, TransportEvent};

/// Receiving half of a driven session. Dropping it cancels the worker.
#[derive(Debug)]
pub struct SessionStream {
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl SessionStream {
    pub async fn recv(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionUpdate> {
        self.updates.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel_tx.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug)]
pub struct SessionHandle {
    pub stream: SessionStream,
    pub worker: JoinHandle<()>,
}

/// Spawns the session worker for one reply stream.
pub fn spawn_session(chunks: ChunkStream) -> SessionHandle {
    spawn_session_with_debounce(chunks, Duration::from_millis(STREAM_IDLE_FLUSH_MS))
}

/// Same as [`spawn_session`] with a caller-tuned idle flush window.
pub fn spawn_session_with_debounce(chunks: ChunkStream, idle_window: Duration) -> SessionHandle {
    let (updates_tx, updates) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let worker = tokio::spawn(run_session_worker(chunks, updates_tx, cancel_rx, idle_window));
    SessionHandle {
        stream: SessionStream {
            updates,
            cancel_tx: Some(cancel_tx),
        },
        worker,
    }
}

async fn run_session_worker(
    mut chunks: ChunkStream,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    mut cancel_rx: oneshot::Receiver<()>,
    idle_window: Duration,
) {
    let mut session = StreamSession::new();
    let mut decoder = FrameDecoder::new();
    let mut idle_flush: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                session.cancel();
                chunks.cancel();
                debug!("session cancelled by caller");
                break;
            }
            _ = wait_idle(&mut idle_flush) => {
                idle_flush = None;
                if session.flush_idle() {
                    let _ = updates.send(SessionUpdate::Blocks(session.blocks_snapshot()));
                }
            }
            event = chunks.recv() => match event {
                Some(TransportEvent::Chunk(chunk)) => {
                    apply_events(&mut session, decoder.push(&chunk), &updates);
                    if session.phase().is_terminal() {
                        break;
                    }
                    rearm_idle(&mut idle_flush, &session, idle_window);
                }
                Some(TransportEvent::Failed { reason }) => {
                    session.fail(reason);
                    break;
                }
                None => {
                    apply_events(&mut session, decoder.finish(), &updates);
                    if !session.phase().is_terminal() {
                        session.fail("stream ended before completion");
                    }
                    break;
                }
            }
        }
    }

    match session.phase() {
        SessionPhase::Done => {
            let _ = updates.send(SessionUpdate::Completed(session.into_finished()));
        }
        SessionPhase::Error => {
            let error = session
                .error_message()
                .unwrap_or(GENERIC_STREAM_ERROR)
                .to_string();
            let _ = updates.send(SessionUpdate::Failed {
                error,
                partial: session.into_finished(),
            });
        }
        // Cancelled or still live (update channel gone): nothing to publish.
        _ => {}
    }
}

fn apply_events(
    session: &mut StreamSession,
    events: Vec<ProtocolEvent>,
    updates: &mpsc::UnboundedSender<SessionUpdate>,
) {
    for event in events {
        match session.handle_event(event) {
            EventOutcome::ThinkingUpdated => {
                if let Some(step) = session.last_thinking() {
                    let _ = updates.send(SessionUpdate::Thinking(step.clone()));
                }
            }
            EventOutcome::BlocksExtended | EventOutcome::CardsMerged => {
                let _ = updates.send(SessionUpdate::Blocks(session.blocks_snapshot()));
            }
            EventOutcome::ContentBuffered | EventOutcome::Ignored => {}
            // Terminal publishing happens after the worker loop.
            EventOutcome::Completed | EventOutcome::Failed => return,
        }
    }
}

async fn wait_idle(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

fn rearm_idle(timer: &mut Option<Pin<Box<Sleep>>>, session: &StreamSession, idle_window: Duration) {
    if session.pending_text().is_empty() {
        *timer = None;
    } else {
        *timer = Some(Box::pin(sleep(idle_window)));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tessera_content::ContentBlock;
    use tessera_content::block::payloads;
    use tokio::time::advance;

    use super::*;
    use crate::transport::{ChatBackend, ChatRequest, ScriptedBackend, make_chunk_stream};

    fn content_frame(text: &str) -> String {
        format!(r#"{{"type":"content","content":"{text}"}}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_flushes_a_short_tail() {
        let (events, stream, _cancel_rx) = make_chunk_stream();
        let mut handle = spawn_session(stream);

        events
            .send(TransportEvent::Chunk(format!(
                "data: {}\n\n",
                content_frame("Hi")
            )))
            .unwrap();

        // Held back at first; the paused clock auto-advances past the idle
        // window and releases it.
        let update = handle.stream.recv().await;
        match update {
            Some(SessionUpdate::Blocks(blocks)) => {
                assert_eq!(payloads(&blocks), payloads(&[ContentBlock::text("Hi")]));
            }
            other => panic!("expected a blocks update, got {other:?}"),
        }
        drop(events);
    }

    #[tokio::test(start_paused = true)]
    async fn new_delta_rearms_the_debounce() {
        let (events, stream, _cancel_rx) = make_chunk_stream();
        let mut handle = spawn_session(stream);

        events
            .send(TransportEvent::Chunk(format!(
                "data: {}\n\n",
                content_frame("Hi")
            )))
            .unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(handle.stream.try_recv().is_none());

        events
            .send(TransportEvent::Chunk(format!(
                "data: {}\n\n",
                content_frame(" there")
            )))
            .unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(handle.stream.try_recv().is_none());

        let update = handle.stream.recv().await;
        match update {
            Some(SessionUpdate::Blocks(blocks)) => {
                assert_eq!(payloads(&blocks), payloads(&[ContentBlock::text("Hi there")]));
            }
            other => panic!("expected a blocks update, got {other:?}"),
        }
        drop(events);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_stream_publishes_finished_and_closes() {
        let backend = ScriptedBackend::from_frames([
            content_frame("A full answer that is long enough to emit."),
            r#"{"type":"done","conversationId":"c3","messageId":"m7"}"#.to_string(),
        ]);
        let transport = backend.open_stream(ChatRequest::new("hello")).unwrap();
        let mut handle = spawn_session(transport.stream);

        let mut finished = None;
        while let Some(update) = handle.stream.recv().await {
            if let SessionUpdate::Completed(done) = update {
                finished = Some(done);
            }
        }
        let finished = finished.unwrap();
        assert_eq!(finished.conversation_id.as_deref(), Some("c3"));
        assert_eq!(finished.message_id.as_deref(), Some("m7"));
        assert_eq!(
            payloads(&finished.blocks),
            payloads(&[ContentBlock::text(
                "A full answer that is long enough to emit."
            )])
        );
        handle.worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_without_done_fails_with_partial() {
        let backend = ScriptedBackend::from_frames([content_frame(
            "Everything received before the connection dropped.",
        )]);
        let transport = backend.open_stream(ChatRequest::new("hello")).unwrap();
        let mut handle = spawn_session(transport.stream);

        let mut failure = None;
        while let Some(update) = handle.stream.recv().await {
            if let SessionUpdate::Failed { error, partial } = update {
                failure = Some((error, partial));
            }
        }
        let (error, partial) = failure.unwrap();
        assert_eq!(error, "stream ended before completion");
        assert_eq!(
            payloads(&partial.blocks),
            payloads(&[ContentBlock::text(
                "Everything received before the connection dropped."
            )])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_updates_without_a_terminal_event() {
        let (events, stream, _cancel_rx) = make_chunk_stream();
        let mut handle = spawn_session(stream);

        events
            .send(TransportEvent::Chunk(format!(
                "data: {}\n\n",
                content_frame("A paragraph that emits straight away, no holdback.")
            )))
            .unwrap();
        let update = handle.stream.recv().await;
        assert!(matches!(update, Some(SessionUpdate::Blocks(_))));

        handle.stream.cancel();
        assert_eq!(handle.stream.recv().await, None);
        handle.worker.await.unwrap();
        drop(events);
    }
}
