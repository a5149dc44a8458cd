//! Error types for capability wiring, the transport and request delegation.

use thiserror::Error;

use super::capability::CapabilityKind;

/// Registration-time errors. These are programmer errors surfaced while wiring
/// capabilities, never at request time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("{kind} '{name}' is already defined")]
    DuplicateName { kind: CapabilityKind, name: String },

    #[error("{kind} '{name}' is already registered on this server")]
    AlreadyRegistered { kind: CapabilityKind, name: String },

    #[error("{kind} '{name}' is not registered on this server")]
    NotRegistered { kind: CapabilityKind, name: String },

    #[error("{kind} '{name}' is not defined")]
    Undefined { kind: CapabilityKind, name: String },

    #[error("{kind} '{name}' must be dev-mode-only or declare an auth requirement")]
    MissingAuth { kind: CapabilityKind, name: String },
}

/// Errors raised by a [`Transport`](super::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is already connected to a server")]
    AlreadyConnected,

    #[error("transport is not connected to a server")]
    NotConnected,

    #[error("transport is closed")]
    Closed,

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure of a delegated operation at the HTTP handler boundary.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Operation panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl RequestError {
    /// Short label used for the failure metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::Timeout { .. } => "timeout",
            RequestError::Panicked(_) => "panic",
            RequestError::Transport(_) => "transport",
            RequestError::Capability(_) => "capability",
        }
    }
}
