//! Bridge error taxonomy.
//!
//! Every failure a handler can produce is one of these kinds; responses carry
//! the human message plus the snake_case kind tag. Classification prefers the
//! vendor status word (a NOT_AUTHORIZED word is an authorization error no
//! matter which operation tripped it) and falls back to the operation's own
//! category.

use thiserror::Error;

use crate::card::adapter::CardFault;
use crate::card::status::StatusKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Malformed or unknown request.
    #[error("{0}")]
    Protocol(String),
    /// No reader detected, or the driver/worker is unavailable.
    #[error("{0}")]
    Device(String),
    /// Card absent, removed, or not recognized.
    #[error("{0}")]
    Card(String),
    #[error("{0}")]
    Initialization(String),
    /// PIN-related refusal.
    #[error("{0}")]
    Authorization(String),
    /// Transaction begin/end failure.
    #[error("{0}")]
    Transaction(String),
    #[error("{0}")]
    Seal(String),
    /// Unexpected fault inside the dispatcher itself.
    #[error("{0}")]
    Internal(String),
}

impl BridgeError {
    /// Taxonomy tag carried in failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Protocol(_) => "protocol_error",
            BridgeError::Device(_) => "device_error",
            BridgeError::Card(_) => "card_error",
            BridgeError::Initialization(_) => "initialization_error",
            BridgeError::Authorization(_) => "authorization_error",
            BridgeError::Transaction(_) => "transaction_error",
            BridgeError::Seal(_) => "seal_computation_error",
            BridgeError::Internal(_) => "internal_error",
        }
    }

    /// Classify an adapter fault, using `default` for status words that do
    /// not map to a more specific kind.
    pub fn from_fault(fault: &CardFault, default: fn(String) -> BridgeError) -> BridgeError {
        let message = fault.message();
        match fault {
            CardFault::Status(status) => match status.kind() {
                StatusKind::NoCard | StatusKind::UnknownCard => BridgeError::Card(message),
                StatusKind::NotAuthorized | StatusKind::PinBlocked => {
                    BridgeError::Authorization(message)
                }
                _ => default(message),
            },
            CardFault::Driver(_) | CardFault::Timeout { .. } => BridgeError::Device(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
