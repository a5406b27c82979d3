use limsml_protocol::ProtocolError;

use crate::transport::TransportError;

/// Errors surfaced by the LIMSML session client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("no action registered for {entity}.{command}")]
    UnknownAction { entity: String, command: String },

    #[error("invalid parameters or entity for action {command}: {reason}")]
    Validation { command: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
