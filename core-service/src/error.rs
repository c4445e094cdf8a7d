use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] core_ingest::IngestError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl ServiceError {
    /// True when the operation stopped because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Ingest(err) if err.is_cancelled())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
