//! Error types for OAuth2 grant negotiation

use common::CredentialValidationError;

/// Errors from grant resolution and token endpoint interactions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    CredentialValidation(#[from] CredentialValidationError),

    #[error("invalid token endpoint {uri:?}: {reason}")]
    InvalidTokenEndpoint { uri: String, reason: String },

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential {0} is required by this grant")]
    MissingField(&'static str),
}

impl From<Error> for auth_middleware::MiddlewareError {
    fn from(e: Error) -> Self {
        match e {
            Error::Transport(e) => auth_middleware::MiddlewareError::Transport(e),
            other => auth_middleware::MiddlewareError::Token(other.to_string()),
        }
    }
}

/// Result alias for grant operations.
pub type Result<T> = std::result::Result<T, Error>;
