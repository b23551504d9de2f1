//! Orchestrates one conversation: sends prompts, drives reply streams, and
//! folds session updates into messages.

use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tessera_stream::{
    ChatBackend, ChatRequest, ChatTurn, GENERIC_STREAM_ERROR, SessionHandle, SessionUpdate,
    TransportError, spawn_session_with_debounce,
};
use tracing::{debug, warn};

use crate::conversation::{
    Conversation, ConversationId, Message, MessageId, MessageStatus, Role, StreamSessionId,
    StreamTarget, StreamTransition,
};
use crate::settings::ChatSettings;

#[derive(Debug, Snafu)]
pub enum ServiceError {
    #[snafu(display("a reply stream is already running"))]
    StreamInProgress,

    #[snafu(display("prompt is empty"))]
    EmptyPrompt,

    #[snafu(display("failed to open the backend stream: {source}"))]
    Backend { source: TransportError },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

struct ActiveStream {
    target: StreamTarget,
    message_id: MessageId,
    handle: SessionHandle,
}

/// One conversation bound to a chat backend.
pub struct ChatService {
    backend: Arc<dyn ChatBackend>,
    settings: ChatSettings,
    conversation: Conversation,
    active: Option<ActiveStream>,
    remote_conversation_id: Option<String>,
    next_message_id: u64,
    next_session_id: u64,
}

impl ChatService {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: ChatSettings) -> Self {
        Self {
            backend,
            settings,
            conversation: Conversation::new(ConversationId::new(1), "New conversation"),
            active: None,
            remote_conversation_id: None,
            next_message_id: 1,
            next_session_id: 1,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Appends the user message, opens a backend stream, and spawns the
    /// session driver for the assistant reply.
    pub fn send(&mut self, prompt: &str) -> ServiceResult<()> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return EmptyPromptSnafu.fail();
        }
        if self.active.is_some() {
            return StreamInProgressSnafu.fail();
        }

        // History is built before the new turn so it never includes it.
        let history = self.request_history();

        let user_id = self.allocate_message_id();
        self.conversation.push_message(Message::user(user_id, prompt));

        let session_id = self.allocate_session_id();
        let assistant_id = self.allocate_message_id();
        let target = StreamTarget::new(self.conversation.id, session_id);
        self.conversation
            .push_message(Message::assistant_streaming(assistant_id, session_id));
        if let Err(rejection) = self
            .conversation
            .apply_stream_transition(StreamTransition::Start(target))
        {
            warn!(?rejection, "stream start rejected");
            return StreamInProgressSnafu.fail();
        }

        let mut request = ChatRequest::new(prompt).with_history(history);
        if let Some(id) = &self.remote_conversation_id {
            request = request.with_conversation_id(id.clone());
        }

        let transport = match self.backend.open_stream(request).context(BackendSnafu) {
            Ok(transport) => transport,
            Err(error) => {
                self.fail_message(assistant_id, target, GENERIC_STREAM_ERROR.to_string());
                return Err(error);
            }
        };

        let handle = spawn_session_with_debounce(
            transport.stream,
            Duration::from_millis(self.settings.idle_flush_ms),
        );
        self.active = Some(ActiveStream {
            target,
            message_id: assistant_id,
            handle,
        });
        Ok(())
    }

    /// Applies session updates until the active stream finishes.
    pub async fn drive(&mut self) {
        loop {
            let update = match self.active.as_mut() {
                Some(active) => active.handle.stream.recv().await,
                None => return,
            };
            match update {
                Some(update) => self.apply_update(update),
                None => {
                    self.finish_without_terminal();
                    return;
                }
            }
            if self.active.is_none() {
                return;
            }
        }
    }

    /// Folds one session update into the streaming assistant message.
    pub fn apply_update(&mut self, update: SessionUpdate) {
        let Some(active) = &self.active else {
            debug!("dropping session update with no active stream");
            return;
        };
        let target = active.target;
        let message_id = active.message_id;
        if !self.conversation.stream_state.accepts(target) {
            warn!(?target, "dropping update for a stale stream session");
            return;
        }

        match update {
            SessionUpdate::Thinking(step) => {
                if let Some(message) = self.conversation.message_mut(message_id) {
                    message.thinking.push(step);
                }
            }
            SessionUpdate::Blocks(blocks) => {
                if let Some(message) = self.conversation.message_mut(message_id) {
                    message.blocks = blocks;
                }
            }
            SessionUpdate::Completed(finished) => {
                self.remote_conversation_id = finished.conversation_id.clone();
                if let Some(message) = self.conversation.message_mut(message_id) {
                    message.blocks = finished.blocks;
                    message.cards = finished.cards;
                    message.thinking = finished.thinking;
                    message.content = finished.content;
                    message.status = MessageStatus::Done;
                }
                let _ = self
                    .conversation
                    .apply_stream_transition(StreamTransition::Complete(target));
                self.active = None;
            }
            SessionUpdate::Failed { error, partial } => {
                if let Some(message) = self.conversation.message_mut(message_id) {
                    message.blocks = partial.blocks;
                    message.cards = partial.cards;
                    message.thinking = partial.thinking;
                    message.content = partial.content;
                    message.status = MessageStatus::Error(error.clone());
                }
                let _ = self
                    .conversation
                    .apply_stream_transition(StreamTransition::Fail {
                        target,
                        message: error,
                    });
                self.active = None;
            }
        }
    }

    /// Stops the active stream; blocks already shown stay frozen.
    pub fn cancel(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.handle.stream.cancel();
        if let Some(message) = self.conversation.message_mut(active.message_id) {
            message.status = MessageStatus::Cancelled;
        }
        let _ = self
            .conversation
            .apply_stream_transition(StreamTransition::Cancel(active.target));
    }

    fn finish_without_terminal(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        warn!("session stream closed without a terminal update");
        self.fail_message(
            active.message_id,
            active.target,
            GENERIC_STREAM_ERROR.to_string(),
        );
    }

    fn fail_message(&mut self, message_id: MessageId, target: StreamTarget, error: String) {
        if let Some(message) = self.conversation.message_mut(message_id) {
            message.status = MessageStatus::Error(error.clone());
        }
        let _ = self
            .conversation
            .apply_stream_transition(StreamTransition::Fail {
                target,
                message: error,
            });
        self.active = None;
    }

    fn request_history(&self) -> Vec<ChatTurn> {
        let turns: Vec<ChatTurn> = self
            .conversation
            .messages
            .iter()
            .filter(|message| {
                matches!(message.status, MessageStatus::Done) && !message.content.is_empty()
            })
            .map(|message| match message.role {
                Role::User => ChatTurn::user(message.content.clone()),
                Role::Assistant => ChatTurn::assistant(message.content.clone()),
            })
            .collect();
        let keep = self.settings.history_limit.min(turns.len());
        turns[turns.len() - keep..].to_vec()
    }

    fn allocate_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.saturating_add(1);
        MessageId::new(id)
    }

    fn allocate_session_id(&mut self) -> StreamSessionId {
        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.saturating_add(1);
        StreamSessionId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use tessera_content::block::{BlockKind, ContentBlock};
    use tessera_stream::{
        BackendStreamHandle, ScriptedBackend, TransportEvent, TransportResult, make_chunk_stream,
    };

    use super::*;
    use crate::conversation::StreamState;

    fn service_with_frames(frames: Vec<String>) -> ChatService {
        let backend = ScriptedBackend::from_frames(frames);
        ChatService::new(Arc::new(backend), ChatSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn send_and_drive_completes_the_reply() {
        let mut service = service_with_frames(vec![
            r#"{"type":"metadata","dataCards":[{"type":"event","id":7,"title":"CPI print"}],"conversationId":"c42"}"#.to_string(),
            r#"{"type":"content","content":"Inflation cooled again this month. [EVENT_CARD:7]"}"#.to_string(),
            r#"{"type":"chart_block","symbol":"SPY","timeRange":"1D"}"#.to_string(),
            r#"{"type":"done","conversationId":"c42","messageId":"m1"}"#.to_string(),
        ]);

        service.send("What happened to inflation?").unwrap();
        assert!(service.is_streaming());
        service.drive().await;

        let conversation = service.conversation();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);

        let reply = &conversation.messages[1];
        assert_eq!(reply.status, MessageStatus::Done);
        assert_eq!(
            reply.content,
            "Inflation cooled again this month. [EVENT_CARD:7]"
        );
        let kinds: Vec<BlockKind> = reply.blocks.iter().map(|block| block.kind()).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Text, BlockKind::Event, BlockKind::Chart]
        );
        assert!(matches!(conversation.stream_state, StreamState::Done(_)));
        assert!(!service.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_is_rejected_while_streaming() {
        let mut service = service_with_frames(vec![r#"{"type":"done"}"#.to_string()]);
        service.send("first").unwrap();
        let error = service.send("second").unwrap_err();
        assert!(matches!(error, ServiceError::StreamInProgress));
        service.drive().await;
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let mut service = service_with_frames(vec![r#"{"type":"done"}"#.to_string()]);
        assert!(matches!(
            service.send("   "),
            Err(ServiceError::EmptyPrompt)
        ));
        assert!(service.conversation().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transport_open_marks_the_reply() {
        // An empty transcript makes the scripted backend refuse to open.
        let mut service = service_with_frames(Vec::new());
        let error = service.send("hello").unwrap_err();
        assert!(matches!(error, ServiceError::Backend { .. }));

        let reply = &service.conversation().messages[1];
        assert_eq!(
            reply.status,
            MessageStatus::Error(GENERIC_STREAM_ERROR.to_string())
        );
        assert!(matches!(
            service.conversation().stream_state,
            StreamState::Error { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_without_done_fails_the_reply() {
        let mut service = service_with_frames(vec![
            r#"{"type":"content","content":"A partial reply that arrived before the cut."}"#
                .to_string(),
        ]);
        service.send("hello").unwrap();
        service.drive().await;

        let reply = &service.conversation().messages[1];
        assert_eq!(
            reply.status,
            MessageStatus::Error("stream ended before completion".to_string())
        );
        assert_eq!(reply.blocks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_freezes_the_streaming_reply() {
        let mut service = service_with_frames(vec![r#"{"type":"done"}"#.to_string()]);
        service.send("hello").unwrap();
        service.cancel();

        let reply = &service.conversation().messages[1];
        assert_eq!(reply.status, MessageStatus::Cancelled);
        assert!(matches!(
            service.conversation().stream_state,
            StreamState::Cancelled(_)
        ));
        assert!(!service.is_streaming());

        // Late updates are dropped once the stream is cancelled.
        service.apply_update(SessionUpdate::Blocks(vec![ContentBlock::text("late")]));
        assert_eq!(service.conversation().messages[1].blocks.len(), 0);
    }

    struct CapturingBackend {
        seen: Mutex<Option<ChatRequest>>,
    }

    impl ChatBackend for CapturingBackend {
        fn label(&self) -> &str {
            "capturing"
        }

        fn open_stream(&self, request: ChatRequest) -> TransportResult<BackendStreamHandle> {
            *self.seen.lock().unwrap() = Some(request);
            let (events, stream, _cancel_rx) = make_chunk_stream();
            let worker = tokio::spawn(async move {
                let _ = events.send(TransportEvent::Chunk(
                    "data: {\"type\":\"done\"}\n\n".to_string(),
                ));
            });
            Ok(BackendStreamHandle { stream, worker })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_history_respects_the_limit() {
        let backend = Arc::new(CapturingBackend {
            seen: Mutex::new(None),
        });
        let settings = ChatSettings {
            history_limit: 2,
            ..ChatSettings::default()
        };
        let mut service = ChatService::new(backend.clone(), settings);

        for turn in ["one", "two", "three"] {
            let id = service.allocate_message_id();
            service.conversation.push_message(Message::user(id, turn));
        }

        service.send("newest question").unwrap();
        service.drive().await;

        let request = backend.seen.lock().unwrap().clone().unwrap();
        assert_eq!(request.prompt, "newest question");
        let history: Vec<&str> = request
            .history
            .iter()
            .map(|turn| turn.content.as_str())
            .collect();
        assert_eq!(history, vec!["two", "three"]);
        assert!(request.conversation_id.is_none());
    }
}
