use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] LibraryError),

    /// The caller's cancellation signal fired before the work committed
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed import file: {0}")]
    ImportFormat(#[from] serde_json::Error),

    /// A record failed and the import stopped (fail-fast)
    #[error("Import of {file} aborted after {processed} records: {source}")]
    ImportAborted {
        file: String,
        processed: u64,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// True for cancellation, including an import aborted by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            IngestError::Cancelled => true,
            IngestError::ImportAborted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
