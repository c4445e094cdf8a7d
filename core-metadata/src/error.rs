use core_auth::AuthError;
use thiserror::Error;

/// Failure of the bounded request queue itself, never of the submitted task
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Request queue is shut down")]
    Shutdown,

    #[error("Queued task panicked")]
    TaskPanicked,
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("Failed to parse provider response: {0}")]
    JsonParse(String),

    #[error("Rate limited by {provider}, retry after {retry_after_seconds}s")]
    RateLimited {
        provider: String,
        retry_after_seconds: u64,
    },

    #[error("Provider authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl MetadataError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, MetadataError::Queue(QueueError::Shutdown))
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
