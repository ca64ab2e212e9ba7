//! Effects produced by state transitions

use crate::model::Rating;
use std::fmt;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the session; `title` is the first message text
    CreateSession { title: String, tool_id: String },

    /// Fetch one page of history
    FetchHistory { offset: u32, limit: u32 },

    /// Open the push channel (only after history resolved)
    OpenPushChannel,

    /// Release the push channel after it failed or was closed remotely
    ClosePushChannel,

    SendMessage { body: String },

    Rate { message_id: String, rating: Rating },

    Regenerate { message_id: String },

    /// Surface a non-blocking notification to the presentation layer
    Notify(Notification),
}

impl Effect {
    pub fn server_error(operation: Operation, detail: impl Into<String>) -> Self {
        Effect::Notify(Notification::server_error(operation, detail))
    }
}

/// Operation a notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateSession,
    LoadHistory,
    Send,
    Rate,
    Regenerate,
    PushChannel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateSession => "create session",
            Operation::LoadHistory => "load history",
            Operation::Send => "send",
            Operation::Rate => "rate",
            Operation::Regenerate => "regenerate",
            Operation::PushChannel => "push channel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A network call failed
    ServerError,
    /// The intent was refused locally; no call was made
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub operation: Operation,
    pub kind: NotificationKind,
    pub detail: String,
}

impl Notification {
    pub fn server_error(operation: Operation, detail: impl Into<String>) -> Self {
        Self {
            operation,
            kind: NotificationKind::ServerError,
            detail: detail.into(),
        }
    }

    pub fn rejected(operation: Operation, detail: impl Into<String>) -> Self {
        Self {
            operation,
            kind: NotificationKind::Rejected,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NotificationKind::ServerError => {
                write!(f, "{} failed: {}", self.operation, self.detail)
            }
            NotificationKind::Rejected => write!(f, "cannot {}: {}", self.operation, self.detail),
        }
    }
}
