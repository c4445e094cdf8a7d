use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token endpoint for {provider} returned {status}: {body}")]
    TokenExchange {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("No client credentials configured for provider {0}")]
    MissingCredentials(String),

    #[error("Operation timed out: {operation}")]
    OperationTimeout { operation: String },

    #[error("HTTP error: {0}")]
    Http(#[from] BridgeError),
}

impl AuthError {
    /// Whether the token endpoint rejected the credentials themselves
    pub fn is_rejected_credentials(&self) -> bool {
        matches!(self, AuthError::TokenExchange { status, .. } if *status == 400 || *status == 401)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
