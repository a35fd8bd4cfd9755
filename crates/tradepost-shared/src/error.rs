use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown user kind: {0}")]
    UnknownUserKind(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Invalid user reference: {0}")]
    InvalidUserRef(String),

    #[error("{0}")]
    MissingField(&'static str),
}
