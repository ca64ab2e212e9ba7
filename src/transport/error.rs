//! Transport error types

use thiserror::Error;

/// Transport error with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// HTTP status for `Server` errors
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Server, message).with_status(status)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ProtocolViolation, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidArgument, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Non-success HTTP status
    Server,
    /// Connection failures, socket errors
    Network,
    /// Success status but undecodable body
    Decode,
    /// Push frame that is neither keepalive nor a message - dropped, never fatal
    ProtocolViolation,
    /// Caller broke a precondition (limit of zero, second push channel, ...)
    InvalidArgument,
}
