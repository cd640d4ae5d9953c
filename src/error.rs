use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Could not decode response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// Errors worth retrying the same request for.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SyncError::Decode(err.to_string());
        }
        match err.status() {
            Some(reqwest::StatusCode::NOT_FOUND) => SyncError::NotFound(err.to_string()),
            Some(status) => SyncError::UnexpectedStatus {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => SyncError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
