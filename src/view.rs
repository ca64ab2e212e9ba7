//! View model derived from conversation state
//!
//! Recomputed after every transition and handed to the presentation layer.

use crate::model::body::{segments, Segment};
use crate::model::{Message, MessageSource, Rating, SourceLink};
use crate::state_machine::{ConvState, Phase, TransitionError};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationView {
    pub session_id: Option<String>,
    pub phase: Phase,
    pub messages: Vec<MessageView>,
    /// An assistant reply is expected
    pub waiting: bool,
    /// Requests in flight
    pub busy: usize,
}

impl ConversationView {
    /// Action flags come from the same checks the state machine applies
    pub fn new(state: &ConvState, busy: usize) -> Self {
        let messages = state
            .messages
            .iter()
            .filter(|m| !m.is_hidden)
            .map(|m| {
                let allowed = |check: fn(&ConvState, &str) -> Result<(), TransitionError>| {
                    m.id().is_some_and(|id| check(state, id).is_ok())
                };
                MessageView::new(
                    m,
                    allowed(ConvState::check_rate),
                    allowed(ConvState::check_regenerate),
                )
            })
            .collect();

        Self {
            session_id: state.session_id.clone(),
            phase: state.phase,
            messages,
            waiting: state.waiting(),
            busy,
        }
    }

    /// Message the regenerate action applies to, if any
    pub fn regenerable(&self) -> Option<&MessageView> {
        self.messages.iter().rev().find(|m| m.can_regenerate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: Option<String>,
    pub is_system: bool,
    pub is_error: bool,
    pub segments: Vec<Segment>,
    pub sources: Vec<SourceView>,
    pub rating: Option<Rating>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub can_rate: bool,
    pub can_regenerate: bool,
}

impl MessageView {
    fn new(message: &Message, can_rate: bool, can_regenerate: bool) -> Self {
        Self {
            id: message.id.clone(),
            is_system: message.is_system,
            is_error: message.is_error,
            segments: segments(&message.body),
            sources: message.sources.iter().map(SourceView::from).collect(),
            rating: message.rating(),
            created_at: message.created_at,
            created_by: message.created_by.clone(),
            can_rate,
            can_regenerate,
        }
    }
}

/// A citation ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceView {
    pub title: String,
    pub caption: String,
    pub target: SourceTarget,
    /// "chunk/total" when known
    pub position: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    Link(String),
    Reference(Option<String>),
}

impl From<&MessageSource> for SourceView {
    fn from(source: &MessageSource) -> Self {
        let target = match source.link() {
            SourceLink::External(url) => SourceTarget::Link(url.to_string()),
            SourceLink::Internal(reference) => SourceTarget::Reference(reference.map(str::to_string)),
        };
        let position = match (source.chunk, source.total_chunks) {
            (Some(chunk), Some(total)) => Some(format!("{chunk}/{total}")),
            (Some(chunk), None) => Some(chunk.to_string()),
            _ => None,
        };
        Self {
            title: source.title.clone(),
            caption: source.caption(),
            target,
            position,
        }
    }
}
