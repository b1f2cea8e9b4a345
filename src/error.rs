use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapredError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapredError {
    /// Shorthand for codec errors, which all carry the offending message kind.
    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        MapredError::MalformedPayload {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapredError>;
