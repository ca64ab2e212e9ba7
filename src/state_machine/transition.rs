//! Pure state transition function

use super::effect::Operation;
use super::{ConvState, Effect, Event, Phase, SessionContext};
use crate::model::Message;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Reasons an event is refused. State is unchanged when this is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("a session is already being created")]
    CreationInFlight,
    #[error("conversation is not ready")]
    NotReady,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no message with id {0}")]
    UnknownMessage(String),
    #[error("message {0} cannot be rated")]
    NotRateable(String),
    #[error("only the last assistant message can be regenerated")]
    RegenerateRejected,
    #[error("an assistant reply is still pending")]
    ReplyPending,
    #[error("a {0} request is already in flight")]
    RequestInFlight(Operation),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function: no I/O, same inputs give the same outputs
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: &ConvState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state.phase, event) {
        // ============================================================
        // Mount
        // ============================================================
        (Phase::Idle, Event::Mount) => match state.session_id {
            Some(_) => Ok(TransitionResult::new(ConvState {
                phase: Phase::Loading {
                    awaiting_reply: false,
                },
                ..state.clone()
            })
            .with_effect(fetch_history(context))),
            // Stay idle until the first send creates a session
            None => Ok(TransitionResult::new(state.clone())),
        },

        // ============================================================
        // Sending
        // ============================================================
        (_, Event::UserSend { text }) if text.trim().is_empty() => {
            Err(TransitionError::EmptyMessage)
        }

        (Phase::Idle, Event::UserSend { text }) if state.session_id.is_none() => {
            Ok(TransitionResult::new(ConvState {
                phase: Phase::CreatingSession,
                ..state.clone()
            })
            .with_effect(Effect::CreateSession {
                title: text,
                tool_id: context.tool_id.clone(),
            }))
        }

        (Phase::CreatingSession, Event::UserSend { .. }) => Err(TransitionError::CreationInFlight),

        // Session known: the reply of an earlier send may still be pending
        (Phase::Live | Phase::AwaitingReply, Event::UserSend { text }) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::SendMessage { body: text }))
        }

        (_, Event::UserSend { .. }) => Err(TransitionError::NotReady),

        (Phase::Live | Phase::AwaitingReply, Event::MessageSent { message }) => {
            Ok(TransitionResult::new(append(state, message, Phase::AwaitingReply)))
        }

        (_, Event::SendFailed { error }) => Ok(TransitionResult::new(state.clone())
            .with_effect(Effect::server_error(Operation::Send, error.message))),

        // ============================================================
        // Session creation
        // ============================================================
        (Phase::CreatingSession, Event::SessionCreated { session_id }) => {
            // The backend records the first message itself and starts replying
            Ok(TransitionResult::new(ConvState {
                phase: Phase::Loading {
                    awaiting_reply: true,
                },
                session_id: Some(session_id),
                ..state.clone()
            })
            .with_effect(fetch_history(context)))
        }

        (Phase::CreatingSession, Event::SessionCreateFailed { error }) => {
            Ok(TransitionResult::new(ConvState {
                phase: Phase::Idle,
                ..state.clone()
            })
            .with_effect(Effect::server_error(Operation::CreateSession, error.message)))
        }

        // ============================================================
        // History
        // ============================================================
        (Phase::Loading { awaiting_reply }, Event::HistoryLoaded { messages }) => {
            // A reply that landed before the channel opened is already in the page
            let replied = messages.last().is_some_and(|m| m.is_system);
            let phase = if awaiting_reply && !replied {
                Phase::AwaitingReply
            } else {
                Phase::Live
            };
            Ok(TransitionResult::new(ConvState {
                phase,
                messages,
                ..state.clone()
            })
            .with_effect(Effect::OpenPushChannel))
        }

        (Phase::Loading { awaiting_reply }, Event::HistoryFailed { error }) => {
            let phase = if awaiting_reply {
                Phase::AwaitingReply
            } else {
                Phase::Live
            };
            Ok(TransitionResult::new(ConvState {
                phase,
                messages: Vec::new(),
                ..state.clone()
            })
            .with_effect(Effect::server_error(Operation::LoadHistory, error.message))
            .with_effect(Effect::OpenPushChannel))
        }

        // ============================================================
        // Push channel
        // ============================================================
        (Phase::Live | Phase::AwaitingReply, Event::PushMessage { message }) => {
            Ok(TransitionResult::new(append(state, message, Phase::Live)))
        }

        (Phase::Live | Phase::AwaitingReply, Event::PushFailed { error }) => {
            Ok(TransitionResult::new(ConvState {
                phase: Phase::Live,
                ..state.clone()
            })
            .with_effect(Effect::ClosePushChannel)
            .with_effect(Effect::server_error(Operation::PushChannel, error.message)))
        }

        (Phase::Live | Phase::AwaitingReply, Event::PushClosed) => {
            Ok(TransitionResult::new(ConvState {
                phase: Phase::Live,
                ..state.clone()
            })
            .with_effect(Effect::ClosePushChannel)
            .with_effect(Effect::server_error(
                Operation::PushChannel,
                "connection closed by server",
            )))
        }

        // ============================================================
        // Rating
        // ============================================================
        (_, Event::UserRate { message_id, rating }) => {
            state.check_rate(&message_id)?;
            let mut new_state = state.clone();
            new_state.pending_rates.insert(message_id.clone());
            Ok(TransitionResult::new(new_state).with_effect(Effect::Rate { message_id, rating }))
        }

        // Last write wins; the message may have been regenerated away meanwhile
        (_, Event::RateAccepted { message_id, rating }) => {
            let mut new_state = state.clone();
            new_state.pending_rates.remove(&message_id);
            if let Some(message) = new_state
                .messages
                .iter_mut()
                .find(|m| m.has_id(&message_id))
            {
                message.rating = Some(rating.value());
            }
            Ok(TransitionResult::new(new_state))
        }

        (_, Event::RateFailed { message_id, error }) => {
            let mut new_state = state.clone();
            new_state.pending_rates.remove(&message_id);
            Ok(TransitionResult::new(new_state).with_effect(Effect::server_error(
                Operation::Rate,
                format!("message {message_id}: {}", error.message),
            )))
        }

        // ============================================================
        // Regenerate
        // ============================================================
        (_, Event::UserRegenerate { message_id }) => {
            state.check_regenerate(&message_id)?;
            let mut new_state = state.clone();
            new_state.pending_regenerate = Some(message_id.clone());
            Ok(TransitionResult::new(new_state).with_effect(Effect::Regenerate { message_id }))
        }

        (Phase::Live | Phase::AwaitingReply, Event::RegenerateAccepted { message_id }) => {
            let mut new_state = state.clone();
            clear_regenerate(&mut new_state, &message_id);
            // Only drop the last element if it is still the regenerated reply
            if new_state.last().is_some_and(|last| last.has_id(&message_id)) {
                new_state.messages.pop();
            }
            new_state.phase = Phase::AwaitingReply;
            Ok(TransitionResult::new(new_state))
        }

        (_, Event::RegenerateFailed { message_id, error }) => {
            let mut new_state = state.clone();
            clear_regenerate(&mut new_state, &message_id);
            Ok(TransitionResult::new(new_state).with_effect(Effect::server_error(
                Operation::Regenerate,
                format!("message {message_id}: {}", error.message),
            )))
        }

        // ============================================================
        // Everything else
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in phase {phase:?}"
        ))),
    }
}

fn fetch_history(context: &SessionContext) -> Effect {
    Effect::FetchHistory {
        offset: 0,
        limit: context.history_limit,
    }
}

fn append(state: &ConvState, message: Message, phase: Phase) -> ConvState {
    let mut new_state = state.clone();
    new_state.messages.push(message);
    new_state.phase = phase;
    new_state
}

fn clear_regenerate(state: &mut ConvState, message_id: &str) {
    if state.pending_regenerate.as_deref() == Some(message_id) {
        state.pending_regenerate = None;
    }
}
