//! OAuth2 field names and protocol constants
//!
//! Field names double as credential-set keys and token endpoint form
//! parameters (RFC 6749).

pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_SECRET: &str = "client_secret";
pub const SCOPE: &str = "scope";
pub const STATE: &str = "state";
pub const REDIRECT_URI: &str = "redirect_uri";
pub const CODE: &str = "code";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const REFRESH_TOKEN: &str = "refresh_token";

/// Fields every built-in grant needs.
pub const REQUIRED_FIELDS: &[&str] = &[CLIENT_ID, CLIENT_SECRET];

/// Fields that never count towards (or against) validation.
pub const OPTIONAL_FIELDS: &[&str] = &[SCOPE, STATE, REDIRECT_URI, CODE];

/// `grant_type` values sent to the token endpoint.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// A cached token is treated as expired this many seconds early.
pub const EXPIRY_LEEWAY_SECS: u64 = 60;

/// Timeout for a single token endpoint round trip.
pub const TOKEN_REQUEST_TIMEOUT_SECS: u64 = 30;
