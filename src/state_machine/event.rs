//! Events that can occur in a conversation

use crate::model::{Message, Rating};
use crate::transport::TransportError;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Lifecycle
    Mount,

    // User intents
    UserSend {
        text: String,
    },
    UserRate {
        message_id: String,
        rating: Rating,
    },
    UserRegenerate {
        message_id: String,
    },

    // Request completions
    SessionCreated {
        session_id: String,
    },
    SessionCreateFailed {
        error: TransportError,
    },
    HistoryLoaded {
        messages: Vec<Message>,
    },
    HistoryFailed {
        error: TransportError,
    },
    MessageSent {
        message: Message,
    },
    SendFailed {
        error: TransportError,
    },
    RateAccepted {
        message_id: String,
        rating: Rating,
    },
    RateFailed {
        message_id: String,
        error: TransportError,
    },
    RegenerateAccepted {
        message_id: String,
    },
    RegenerateFailed {
        message_id: String,
        error: TransportError,
    },

    // Push channel
    PushMessage {
        message: Message,
    },
    PushFailed {
        error: TransportError,
    },
    PushClosed,
}

impl Event {
    /// Whether the event originates from the user rather than the network
    pub fn is_user_intent(&self) -> bool {
        matches!(
            self,
            Event::UserSend { .. } | Event::UserRate { .. } | Event::UserRegenerate { .. }
        )
    }
}
