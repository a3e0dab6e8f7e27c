//! Credentialed API client factory
//!
//! Turns a base URI plus a set of named credential fields into an HTTP
//! client that authenticates every request. Callers pick a scheme and hand
//! over credentials; the factory validates them, assembles the scheme's
//! middleware, and returns an `ApiClient`.
//!
//! Build flow:
//! 1. `create()` (or a scheme function) validates the credentials
//! 2. The scheme's options (auth tuple, handler stack, default headers) are built
//! 3. Caller options are merged on top (caller wins)
//! 4. The transport is configured and the handle returned
//!
//! Nothing touches the network until the first request; OAuth2 tokens are
//! acquired lazily at that point.

mod client;
pub mod error;
mod factory;
mod metrics;
pub mod options;
pub mod scheme;

pub use client::ApiClient;
pub use error::{Error, Result};
pub use factory::{basic_auth, bearer_token, create, digest, ntlm, oauth1, oauth2, oauth2_grants};
pub use options::{AuthConfig, ClientOptions};
pub use scheme::AuthScheme;

pub use auth_middleware::HandlerStack;
pub use common::{CredentialSet, CredentialValidationError, Secret};
pub use oauth2_grants::Grant;
