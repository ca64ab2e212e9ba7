//! Conversation state types

use super::effect::Operation;
use super::transition::TransitionError;
use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::model::Message;
use std::collections::BTreeSet;

/// Lifecycle phase of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Not mounted yet, or mounted without a session
    #[default]
    Idle,
    /// First send issued the session creation call
    CreatingSession,
    /// History fetch in flight; the push channel opens once it resolves
    Loading {
        /// A reply was already expected when loading started
        awaiting_reply: bool,
    },
    /// Log populated, push channel open
    Live,
    /// Live with an assistant reply pending
    AwaitingReply,
}

/// State of one conversation: phase, session identity and the message log
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvState {
    pub phase: Phase,
    /// Fixed once set
    pub session_id: Option<String>,
    /// Append-only, except for dropping the last element on regenerate
    pub messages: Vec<Message>,
    /// Messages with a rate request in flight
    pub pending_rates: BTreeSet<String>,
    /// Message whose regenerate request is in flight
    pub pending_regenerate: Option<String>,
}

impl ConvState {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    /// Waiting indicator: an assistant reply is expected but has not arrived
    pub fn waiting(&self) -> bool {
        matches!(
            self.phase,
            Phase::AwaitingReply
                | Phase::Loading {
                    awaiting_reply: true
                }
        )
    }

    /// Push channel open (or about to be): history has been applied
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live | Phase::AwaitingReply)
    }

    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.has_id(message_id))
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether `message_id` can be rated right now
    pub fn check_rate(&self, message_id: &str) -> Result<(), TransitionError> {
        if !self.is_live() {
            return Err(TransitionError::NotReady);
        }
        let message = self
            .find(message_id)
            .ok_or_else(|| TransitionError::UnknownMessage(message_id.to_string()))?;
        if !message.is_system || message.is_error {
            return Err(TransitionError::NotRateable(message_id.to_string()));
        }
        if self.pending_rates.contains(message_id) {
            return Err(TransitionError::RequestInFlight(Operation::Rate));
        }
        Ok(())
    }

    /// Whether `message_id` can be regenerated right now.
    ///
    /// Only the last assistant message qualifies, and only while no reply
    /// and no other regenerate is pending.
    pub fn check_regenerate(&self, message_id: &str) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Live => {}
            Phase::AwaitingReply => return Err(TransitionError::ReplyPending),
            _ => return Err(TransitionError::NotReady),
        }
        if self.pending_regenerate.is_some() {
            return Err(TransitionError::RequestInFlight(Operation::Regenerate));
        }
        let regenerable = self
            .last()
            .is_some_and(|last| last.is_system && last.has_id(message_id));
        if !regenerable {
            return Err(TransitionError::RegenerateRejected);
        }
        Ok(())
    }
}

/// Static configuration of a conversation, resolved from its tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub tool_id: String,
    /// Tool name used in the per-session endpoint path
    pub tool_name: String,
    /// Page size of the initial history fetch
    pub history_limit: u32,
}

impl SessionContext {
    pub fn new(tool_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }
}
