//! Protocol error taxonomy for both agent roles.
//!
//! These cover structural violations only. Expected-but-rejected traffic
//! (an action out of turn, an action the game rules refuse) is not an
//! error and never surfaces here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The envelope type is unknown, or illegal for the receiving role.
    #[error("message of type '{0}' can not be handled")]
    MessageType(String),

    /// An update arrived from a peer that is not the configured server.
    #[error("message received from unauthorized agent '{0}'")]
    UnauthorizedSender(String),

    #[error("player '{0}' already connected in the server")]
    PlayerAlreadyConnected(String),

    #[error("player '{0}' not found in the server")]
    PlayerNotFound(String),

    /// A payload's key set does not match the declared contract.
    #[error("invalid content: message of type '{message_type}' expected keys {expected:?}, but received {actual:?}")]
    InvalidContent {
        message_type: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}
