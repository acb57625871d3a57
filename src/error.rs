use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Well-formed response carrying a non-OK status; holds the backend's message.
    #[error("{0}")]
    Backend(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FeedError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        FeedError::Message(msg.into())
    }

    pub fn backend<T: Into<String>>(msg: T) -> Self {
        FeedError::Backend(msg.into())
    }
}
