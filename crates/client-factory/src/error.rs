//! Error types for client construction and requests

use auth_middleware::MiddlewareError;
use common::CredentialValidationError;

/// Errors from building or using a credentialed client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    CredentialValidation(#[from] CredentialValidationError),

    #[error("invalid base URI {uri:?}: {reason}")]
    InvalidBaseUri { uri: String, reason: String },

    #[error("invalid request path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unknown authentication scheme {0:?}")]
    UnknownScheme(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication middleware failed: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error("OAuth2 grant failed: {0}")]
    Grant(oauth2_grants::Error),
}

impl From<oauth2_grants::Error> for Error {
    fn from(e: oauth2_grants::Error) -> Self {
        match e {
            oauth2_grants::Error::CredentialValidation(e) => Error::CredentialValidation(e),
            oauth2_grants::Error::InvalidTokenEndpoint { uri, reason } => {
                Error::InvalidBaseUri { uri, reason }
            }
            other => Error::Grant(other),
        }
    }
}

/// Result alias for factory operations.
pub type Result<T> = std::result::Result<T, Error>;
