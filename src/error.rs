// src/error.rs
//! Error taxonomy for the credential wallet core.
//!
//! Failures are grouped into a small closed set of classes so that callers
//! can react to the class rather than the message:
//! - `Decode`: malformed or mismatched-schema credential data
//! - `NotFound`: a card, destination, or handler is absent
//! - `Transport`: network or message-bus delivery failure
//! - `State`: an operation is invalid for the current lifecycle state
//! - `RemoteService`: the helper service answered with an error
//! - `Storage`: the key-value store rejected a persistence operation
//!
//! Decode and remote-call failures are returned as values and surfaced to
//! the invoking context as structured failures. Programming-invariant
//! violations (e.g. a missing card during an internally issued request)
//! propagate as errors, which the message bus translates into a rejected
//! call for the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed error for every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The encoded credential could not be decoded with the selected schema.
    #[error("decode error: {0}")]
    Decode(String),

    /// A card, destination, or handler does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A network request or bus delivery failed before producing a result.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation is not valid for the current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),

    /// The external helper service reported a failure.
    #[error("remote service error: {0}")]
    RemoteService(String),

    /// The key-value store failed to persist or load data.
    #[error("storage error: {0}")]
    Storage(String),
}

impl WalletError {
    /// Stable identifier for the error class, used on the bus wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::Decode(_) => "decode",
            WalletError::NotFound(_) => "not-found",
            WalletError::Transport(_) => "transport",
            WalletError::State(_) => "state",
            WalletError::RemoteService(_) => "remote-service",
            WalletError::Storage(_) => "storage",
        }
    }

    fn message(&self) -> String {
        match self {
            WalletError::Decode(m)
            | WalletError::NotFound(m)
            | WalletError::Transport(m)
            | WalletError::State(m)
            | WalletError::RemoteService(m)
            | WalletError::Storage(m) => m.clone(),
        }
    }
}

/// JSON-serializable form of a failure carried in a message-bus reply.
///
/// Rejected calls cross context boundaries as `{kind, message}` pairs and
/// are reconstructed into a [`WalletError`] on the calling side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusFault {
    /// Error class identifier (see [`WalletError::kind`]).
    pub kind: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl BusFault {
    /// Fault returned when no handler matches a routed action.
    pub fn no_handler(action: &str) -> Self {
        BusFault {
            kind: "not-found".to_string(),
            message: format!("no handler for action {}", action),
        }
    }
}

impl From<WalletError> for BusFault {
    fn from(error: WalletError) -> Self {
        BusFault {
            kind: error.kind().to_string(),
            message: error.message(),
        }
    }
}

impl From<BusFault> for WalletError {
    fn from(fault: BusFault) -> Self {
        match fault.kind.as_str() {
            "decode" => WalletError::Decode(fault.message),
            "not-found" => WalletError::NotFound(fault.message),
            "state" => WalletError::State(fault.message),
            "remote-service" => WalletError::RemoteService(fault.message),
            "storage" => WalletError::Storage(fault.message),
            _ => WalletError::Transport(fault.message),
        }
    }
}
