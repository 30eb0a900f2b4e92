use thiserror::Error;

use crate::domain::envelope::{FieldError, MessageKind, SessionId};

/// Defects surfaced by an orchestration routine.
///
/// Expected operation failures never use this type: they travel back to the
/// caller inside the reply envelope. A `CoreError` means something an operator
/// has to look at.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No handler registered for an inbound opcode
    #[error("No handler registered for message kind: {0}")]
    UnknownMessageKind(MessageKind),

    /// Sending an envelope failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A correlated reply had the wrong kind
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The session inbox closed while the routine was still running
    #[error("Session closed: {0}")]
    SessionClosed(SessionId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// Transport failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Destination is not connected
    #[error("destination {0} unreachable")]
    Unreachable(String),

    /// Transport has shut down
    #[error("transport closed")]
    Closed,

    /// Any other send failure
    #[error("{0}")]
    Other(String),
}

/// Failure reported by the resource authority
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// Requested entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Entity exists but the requested transition is not allowed
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Entity already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Any other authority failure
    #[error("{0}")]
    Other(String),
}

/// Outcome of a single forward-and-wait exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The request could not be sent
    #[error("send request fail: {0}")]
    Transport(#[from] TransportError),

    /// No correlated reply arrived in time
    #[error("timeout")]
    Timeout,

    /// A reply arrived with another kind than expected
    #[error("unexpected reply {received}, expected {expected}")]
    UnexpectedReply {
        /// Kind the protocol requires
        expected: MessageKind,
        /// Kind that arrived
        received: MessageKind,
    },

    /// The remote party answered with `success = false`
    #[error("{0}")]
    Rejected(String),

    /// The session inbox closed while waiting
    #[error("session closed")]
    SessionClosed,
}

/// Operation failure reported back to the requester.
///
/// The `Display` text of this type is what lands in the `error` field of the
/// failure reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Required field missing or of the wrong type, or identifier rejected
    #[error("invalid request: {0}")]
    Malformed(String),

    /// The resource authority refused the call
    #[error("{0}")]
    Authority(#[from] AuthorityError),

    /// No correlated reply within the operate timeout
    #[error("timeout")]
    Timeout,

    /// The remote party replied with a failure; text is taken verbatim
    #[error("{0}")]
    Remote(String),

    /// A correlated reply had the wrong kind
    #[error("unexpected reply {received}, expected {expected}")]
    ProtocolViolation {
        /// Kind the protocol requires
        expected: MessageKind,
        /// Kind that arrived
        received: MessageKind,
    },

    /// The request could not be sent
    #[error("send request fail: {0}")]
    Transport(String),
}

impl OperationError {
    /// Protocol violations are defects in addition to failed operations
    pub fn is_defect(&self) -> bool {
        matches!(self, OperationError::ProtocolViolation { .. })
    }
}

impl From<FieldError> for OperationError {
    fn from(err: FieldError) -> Self {
        OperationError::Malformed(err.to_string())
    }
}

impl From<ForwardError> for OperationError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Transport(e) => OperationError::Transport(e.to_string()),
            ForwardError::Timeout => OperationError::Timeout,
            ForwardError::UnexpectedReply { expected, received } => {
                OperationError::ProtocolViolation { expected, received }
            }
            ForwardError::Rejected(text) => OperationError::Remote(text),
            ForwardError::SessionClosed => OperationError::Transport("session closed".to_string()),
        }
    }
}

impl From<OperationError> for CoreError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::ProtocolViolation { .. } => {
                CoreError::ProtocolViolation(err.to_string())
            }
            other => CoreError::Other(other.to_string()),
        }
    }
}
