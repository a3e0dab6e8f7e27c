//! OAuth2 grant negotiation
//!
//! Decides which OAuth2 grant a client should use, talks to the token
//! endpoint, and provides the middleware that keeps a bearer token attached
//! to every request. Standalone library: it depends on the middleware
//! contract but not on the factory that assembles clients.
//!
//! Flow:
//! 1. `resolve()` validates the credential set and picks a `GrantChain`
//! 2. A `TokenEndpoint` handshake client is bound to the base URI
//! 3. `OAuth2Middleware` acquires a token lazily on the first request
//! 4. Expired tokens are renewed through the refresh step when layered

pub mod constants;
pub mod error;
pub mod grant;
mod metrics;
pub mod middleware;
pub mod token;

pub use error::{Error, Result};
pub use grant::{Grant, GrantChain, GrantType, RefreshTokenGrant, resolve};
pub use middleware::OAuth2Middleware;
pub use token::{AccessToken, TokenEndpoint, TokenResponse};
