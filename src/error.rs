use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("Definition '{0}' registered outside the definition phase")]
    RuntimeRegistration(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unresolved definitions: {}", names.join(", "))]
    UnresolvedDefinition { names: Vec<String> },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Type mismatch on field '{field}': expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("Commit already in progress for this observer")]
    CommitInProgress,

    #[error("Observer error: {0}")]
    Observer(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl ShareError {
    pub fn unknown_object() -> Self {
        ShareError::UnknownReference("unknown object".to_string())
    }

    pub fn unknown_function() -> Self {
        ShareError::UnknownReference("unknown function".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
