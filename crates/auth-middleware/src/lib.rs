//! Request authentication middleware
//!
//! Defines the `Middleware` trait that decouples the client request path from
//! authentication mechanics. Each scheme (Basic, Digest, NTLM, OAuth1 here;
//! OAuth2 in the `oauth2-grants` crate) implements the same trait and is
//! composed into a `HandlerStack` that the client runs for every request.

pub mod basic;
pub mod digest;
pub mod headers;
pub mod ntlm;
pub mod oauth1;
mod stack;

pub use basic::BasicAuth;
pub use digest::{DigestAlgorithm, DigestAuth, DigestChallenge};
pub use headers::{apply_default_headers, validate_default_headers};
pub use ntlm::{NtlmAuth, Type2Message};
pub use oauth1::{OAuth1Signer, Placement, SignatureMethod};
pub use stack::HandlerStack;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;

/// What a middleware wants done after an authentication challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// State was updated; re-prepare and resend the request once.
    Retry,
    /// Nothing this middleware can do; return the response as-is.
    Ignore,
}

/// Errors from middleware operations (signing, challenge parsing, token acquisition).
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("invalid value for header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("malformed authentication challenge: {0}")]
    Challenge(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("token acquisition failed: {0}")]
    Token(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Result alias for middleware operations.
pub type Result<T> = std::result::Result<T, MiddlewareError>;

/// Abstraction over per-request authentication strategies.
///
/// The client delegates all auth concerns to the stack:
/// - `prepare_request` injects headers or rewrites the URL before sending
/// - `handle_challenge` inspects a `401` and decides whether a retry can succeed
/// - `describe` reports the non-secret configuration for logging and inspection
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Middleware>`).
pub trait Middleware: Send + Sync {
    /// Identifier for logging (e.g. "basic", "oauth1", "oauth2")
    fn id(&self) -> &str;

    /// Authenticate an outgoing request in place.
    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// React to an authentication challenge from upstream.
    ///
    /// Only called for `401 Unauthorized` responses. Returning `Retry` causes
    /// the client to run `prepare_request` on a fresh copy of the original
    /// request and send it exactly once more.
    fn handle_challenge<'a>(
        &'a self,
        status: StatusCode,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<ChallengeOutcome>> + Send + 'a>>;

    /// Non-secret configuration summary. Never includes passwords or tokens.
    fn describe(&self) -> serde_json::Value;
}

/// Find the first `WWW-Authenticate` value for `scheme` and return the part
/// after the scheme name. A bare scheme with no parameters yields `""`.
pub(crate) fn find_challenge<'h>(headers: &'h HeaderMap, scheme: &str) -> Option<&'h str> {
    headers
        .get_all(reqwest::header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            let value = value.trim();
            let head = value.get(..scheme.len())?;
            if !head.eq_ignore_ascii_case(scheme) {
                return None;
            }
            let rest = &value[scheme.len()..];
            if rest.is_empty() {
                Some(rest)
            } else if rest.starts_with(' ') {
                Some(rest.trim())
            } else {
                None
            }
        })
}

/// Seconds since the unix epoch (0 if the clock is before 1970).
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lowercase hex encoding.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
