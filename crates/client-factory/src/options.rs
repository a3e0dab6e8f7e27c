//! Client construction options
//!
//! `ClientOptions` is the request-default bag handed to every scheme
//! function. The factory builds its own options for the scheme and then
//! merges the caller's on top: the caller wins for every field it sets, and
//! request-default headers merge per header name.

use std::collections::BTreeMap;

use auth_middleware::HandlerStack;
use common::Secret;

/// Credentials the client attaches itself, plus the OAuth marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Basic {
        username: String,
        password: Secret<String>,
    },
    Digest {
        username: String,
        password: Secret<String>,
    },
    Ntlm {
        username: String,
        password: Secret<String>,
    },
    /// Authentication is handled entirely by the handler stack.
    OAuth,
}

impl AuthConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::Digest { .. } => "digest",
            AuthConfig::Ntlm { .. } => "ntlm",
            AuthConfig::OAuth => "oauth",
        }
    }
}

/// Request defaults and client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub base_uri: Option<String>,
    /// Headers added to every request that does not set them itself.
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub auth: Option<AuthConfig>,
    pub handler: Option<HandlerStack>,
    /// Options the factory does not interpret, carried verbatim.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_handler(mut self, handler: HandlerStack) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layer `overrides` on top of `self`. Last write wins.
    pub fn merge(mut self, overrides: ClientOptions) -> ClientOptions {
        if overrides.base_uri.is_some() {
            self.base_uri = overrides.base_uri;
        }
        if overrides.timeout_secs.is_some() {
            self.timeout_secs = overrides.timeout_secs;
        }
        if overrides.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = overrides.connect_timeout_secs;
        }
        if overrides.auth.is_some() {
            self.auth = overrides.auth;
        }
        if overrides.handler.is_some() {
            self.handler = overrides.handler;
        }
        // Header names are case-insensitive; drop any differently-cased duplicate first.
        for (name, value) in overrides.headers {
            self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
            self.headers.insert(name, value);
        }
        self.extra.extend(overrides.extra);
        self
    }
}
