//! Conversation state: messages, roles, and the stream lifecycle guard.
//!
//! Exactly one reply stream may be active per conversation. Every terminal
//! transition must name the session it belongs to, so a stale worker can
//! never mutate a message it no longer owns.

use tessera_content::{CardSet, ContentBlock};
use tessera_stream::ThinkingStep;

/// Stable identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

impl ConversationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one streaming generation session.
///
/// Changes on every submit/retry so stale updates can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key for stream updates: which conversation, which attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageStatus {
    Streaming(StreamSessionId),
    Done,
    Error(String),
    Cancelled,
}

/// One chat message with its structured reply content.
///
/// User messages carry only `content`; assistant messages additionally grow
/// `blocks`, `cards`, and `thinking` while their stream runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub blocks: Vec<ContentBlock>,
    pub cards: CardSet,
    pub thinking: Vec<ThinkingStep>,
    pub status: MessageStatus,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            blocks: Vec::new(),
            cards: CardSet::new(),
            thinking: Vec::new(),
            status: MessageStatus::Done,
        }
    }

    /// Assistant placeholder that a live stream fills in.
    pub fn assistant_streaming(id: MessageId, session_id: StreamSessionId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            blocks: Vec::new(),
            cards: CardSet::new(),
            thinking: Vec::new(),
            status: MessageStatus::Streaming(session_id),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }
}

/// Conversation aggregate: ordered messages plus the stream guard.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub stream_state: StreamState,
}

impl Conversation {
    pub fn new(id: ConversationId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            stream_state: StreamState::Idle,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    /// Applies one stream transition, updating the guard on success.
    pub fn apply_stream_transition(
        &mut self,
        transition: StreamTransition,
    ) -> Result<StreamState, StreamTransitionRejection> {
        let next = self.stream_state.apply(transition)?;
        self.stream_state = next.clone();
        Ok(next)
    }
}

/// Stream lifecycle guard for one conversation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

/// Input to the lifecycle guard.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
    ResetToIdle,
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

impl StreamState {
    /// The active target if and only if a stream is running.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            _ => None,
        }
    }

    /// Whether an update routed at `target` may touch the conversation.
    pub fn accepts(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition deterministically. Starting is allowed from any
    /// non-streaming state; terminal transitions must match the active
    /// session exactly.
    pub fn apply(&self, transition: StreamTransition) -> Result<Self, StreamTransitionRejection> {
        match transition {
            StreamTransition::Start(target) => match self {
                Self::Streaming(active) if *active != target => {
                    Err(StreamTransitionRejection::AlreadyStreaming {
                        active: *active,
                        attempted: target,
                    })
                }
                Self::Streaming(_) => Ok(self.clone()),
                _ => Ok(Self::Streaming(target)),
            },
            StreamTransition::Complete(target) => {
                self.terminal(target, Self::Done(target))
            }
            StreamTransition::Fail { target, message } => {
                self.terminal(target, Self::Error { target, message })
            }
            StreamTransition::Cancel(target) => {
                self.terminal(target, Self::Cancelled(target))
            }
            StreamTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn terminal(
        &self,
        target: StreamTarget,
        next: Self,
    ) -> Result<Self, StreamTransitionRejection> {
        match self {
            Self::Streaming(active) if *active == target => Ok(next),
            Self::Streaming(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            _ => Err(StreamTransitionRejection::NoActiveStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn target(session: u64) -> StreamTarget {
        StreamTarget::new(ConversationId::new(1), StreamSessionId::new(session))
    }

    #[test]
    fn start_complete_cycle() {
        let mut conversation = Conversation::new(ConversationId::new(1), "Earnings chat");
        let first = target(1);

        let state = conversation
            .apply_stream_transition(StreamTransition::Start(first))
            .unwrap();
        assert_eq!(state, StreamState::Streaming(first));
        assert!(conversation.stream_state.accepts(first));

        let state = conversation
            .apply_stream_transition(StreamTransition::Complete(first))
            .unwrap();
        assert_eq!(state, StreamState::Done(first));
        assert_eq!(conversation.stream_state.active_target(), None);
    }

    #[test]
    fn second_start_with_new_session_is_rejected_while_streaming() {
        let mut state = StreamState::Idle;
        state = state.apply(StreamTransition::Start(target(1))).unwrap();

        let rejection = state.apply(StreamTransition::Start(target(2))).unwrap_err();
        assert_eq!(
            rejection,
            StreamTransitionRejection::AlreadyStreaming {
                active: target(1),
                attempted: target(2),
            }
        );

        // Re-start of the same session is a no-op.
        assert_eq!(
            state.apply(StreamTransition::Start(target(1))).unwrap(),
            StreamState::Streaming(target(1))
        );
    }

    #[test]
    fn stale_session_cannot_finish_the_active_stream() {
        let state = StreamState::Streaming(target(2));
        let rejection = state
            .apply(StreamTransition::Complete(target(1)))
            .unwrap_err();
        assert_eq!(
            rejection,
            StreamTransitionRejection::SessionMismatch {
                active: target(2),
                attempted: target(1),
            }
        );
        assert!(!state.accepts(target(1)));
    }

    #[test]
    fn terminal_transitions_require_an_active_stream() {
        for transition in [
            StreamTransition::Complete(target(1)),
            StreamTransition::Fail {
                target: target(1),
                message: "boom".into(),
            },
            StreamTransition::Cancel(target(1)),
        ] {
            assert_eq!(
                StreamState::Idle.apply(transition).unwrap_err(),
                StreamTransitionRejection::NoActiveStream
            );
        }
    }

    #[test]
    fn fail_keeps_the_error_message() {
        let state = StreamState::Streaming(target(3))
            .apply(StreamTransition::Fail {
                target: target(3),
                message: "backend closed".into(),
            })
            .unwrap();
        assert_eq!(
            state,
            StreamState::Error {
                target: target(3),
                message: "backend closed".into(),
            }
        );
    }

    #[test]
    fn message_lookup_by_id() {
        let mut conversation = Conversation::new(ConversationId::new(1), "t");
        conversation.push_message(Message::user(MessageId::new(1), "hi"));
        conversation.push_message(Message::assistant_streaming(
            MessageId::new(2),
            StreamSessionId::new(1),
        ));

        assert!(conversation.message_mut(MessageId::new(2)).is_some());
        assert!(conversation.message_mut(MessageId::new(9)).is_none());
        assert!(
            conversation
                .message_mut(MessageId::new(2))
                .map(|message| message.is_streaming())
                .unwrap_or(false)
        );
    }
}
