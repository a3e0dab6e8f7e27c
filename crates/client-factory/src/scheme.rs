//! Supported authentication schemes and their credential requirements

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The closed set of schemes the factory can build clients for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    OAuth1,
    OAuth2,
    Basic,
    Digest,
    Ntlm,
    Bearer,
}

impl AuthScheme {
    pub const ALL: [AuthScheme; 6] = [
        AuthScheme::OAuth1,
        AuthScheme::OAuth2,
        AuthScheme::Basic,
        AuthScheme::Digest,
        AuthScheme::Ntlm,
        AuthScheme::Bearer,
    ];

    /// Stable lowercase name used in errors, logs, metrics and config files.
    pub fn name(&self) -> &'static str {
        match self {
            AuthScheme::OAuth1 => "oauth1",
            AuthScheme::OAuth2 => "oauth2",
            AuthScheme::Basic => "basic",
            AuthScheme::Digest => "digest",
            AuthScheme::Ntlm => "ntlm",
            AuthScheme::Bearer => "bearer",
        }
    }

    /// Credential fields that must be present.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            AuthScheme::OAuth1 => &["consumer_key", "consumer_secret", "token", "token_secret"],
            AuthScheme::OAuth2 => oauth2_grants::constants::REQUIRED_FIELDS,
            AuthScheme::Basic => &["username", "password"],
            AuthScheme::Digest => &["username", "password", "digest"],
            AuthScheme::Ntlm => &["username", "password", "ntlm"],
            AuthScheme::Bearer => &["token"],
        }
    }

    /// Credential fields ignored by validation (OAuth2 only).
    pub fn optional_fields(&self) -> &'static [&'static str] {
        match self {
            AuthScheme::OAuth2 => oauth2_grants::constants::OPTIONAL_FIELDS,
            _ => &[],
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuthScheme::ALL
            .into_iter()
            .find(|scheme| scheme.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownScheme(s.to_string()))
    }
}
