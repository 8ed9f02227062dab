use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfabError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream read error: {0}")]
    Transport(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Context provider error: {0}")]
    Augmentation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Message is empty")]
    EmptyInput,

    #[error("No user message to retry")]
    NothingToRetry,

    #[error("Generation cancelled")]
    Cancelled,
}

impl ConfabError {
    pub fn status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// Errors raised before any network call is attempted.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnknownProvider(_))
    }
}

pub type Result<T> = std::result::Result<T, ConfabError>;
