//! Credentialed HTTP client handle
//!
//! Request path:
//! 1. Resolve the path against the base URI
//! 2. Apply request-default headers (per-request headers win)
//! 3. Run every handler-stack layer's `prepare_request` in order
//! 4. Send; on `401`, offer the challenge to the stack and, if a layer asks
//!    for it, re-prepare a fresh copy of the request and send it once more

use std::collections::BTreeMap;
use std::time::Duration;

use auth_middleware::{
    BasicAuth, DigestAuth, HandlerStack, NtlmAuth, apply_default_headers, validate_default_headers,
};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::{AuthConfig, ClientOptions};
use crate::scheme::AuthScheme;

/// A ready-to-use client that authenticates every request.
///
/// Cheap to clone; clones share the connection pool and the handler stack
/// (and with it any cached OAuth2 token or Digest nonce).
#[derive(Debug, Clone)]
pub struct ApiClient {
    scheme: AuthScheme,
    http: reqwest::Client,
    base_uri: Url,
    stack: HandlerStack,
    options: ClientOptions,
}

impl ApiClient {
    /// Build a client from fully merged options.
    pub(crate) fn build(scheme: AuthScheme, options: ClientOptions) -> Result<Self> {
        let base_uri = parse_base_uri(options.base_uri.as_deref().unwrap_or_default())?;
        validate_default_headers(&options.headers)?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = options.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = options.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }

        let mut stack = options.handler.clone().unwrap_or_default();
        match &options.auth {
            Some(AuthConfig::Basic { username, password }) => {
                stack.push(BasicAuth::new(username.clone(), password.clone()));
            }
            Some(AuthConfig::Digest { username, password }) => {
                stack.push(DigestAuth::new(username.clone(), password.clone()));
            }
            Some(AuthConfig::Ntlm { username, password }) => {
                // NTLM authenticates the connection, not the request.
                builder = builder.http1_only();
                stack.push(NtlmAuth::new(username, password.clone()));
            }
            Some(AuthConfig::OAuth) | None => {}
        }

        Ok(Self {
            scheme,
            http: builder.build()?,
            base_uri,
            stack,
            options,
        })
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Request-default headers applied to every request.
    pub fn default_headers(&self) -> &BTreeMap<String, String> {
        &self.options.headers
    }

    /// The effective (merged) options this client was built from.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Middleware run for every request, including the scheme's own layer.
    pub fn handler(&self) -> &HandlerStack {
        &self.stack
    }

    /// Non-secret summary of the client configuration.
    pub fn describe(&self) -> serde_json::Value {
        let headers: serde_json::Map<String, serde_json::Value> = self
            .options
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if name.eq_ignore_ascii_case("authorization") {
                    "[REDACTED]"
                } else {
                    value.as_str()
                };
                (name.clone(), serde_json::Value::from(shown))
            })
            .collect();

        serde_json::json!({
            "scheme": self.scheme.name(),
            "base_uri": self.base_uri.as_str(),
            "auth": self.options.auth.as_ref().map(|a| a.mode()),
            "headers": headers,
            "timeout_secs": self.options.timeout_secs,
            "connect_timeout_secs": self.options.connect_timeout_secs,
            "handler": self.stack.describe(),
            "extra": self.options.extra,
        })
    }

    /// Resolve `path` against the base URI (RFC 3986 reference resolution).
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_uri.join(path).map_err(|e| Error::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Start a request; finish it with `send`.
    pub fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        Ok(self.http.request(method, self.url(path)?))
    }

    pub fn get(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        self.request(Method::POST, path)
    }

    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.execute(builder.build()?).await
    }

    /// Authenticate and send `request`, retrying once after a challenge.
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        apply_default_headers(request.headers_mut(), &self.options.headers);
        let retry_copy = request.try_clone();

        self.stack.prepare(&mut request).await?;
        let response = self.http.execute(request).await?;

        let status = response.status();
        if status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !self.stack.challenge(status, response.headers()).await? {
            return Ok(response);
        }
        let Some(mut retry) = retry_copy else {
            warn!(scheme = %self.scheme, "request body cannot be replayed, returning challenge response");
            return Ok(response);
        };

        // Drain the challenge so the connection goes back to the pool for the retry.
        let _ = response.bytes().await;

        debug!(scheme = %self.scheme, url = %retry.url(), "retrying after authentication challenge");
        self.stack.prepare(&mut retry).await?;
        Ok(self.http.execute(retry).await?)
    }
}

fn parse_base_uri(uri: &str) -> Result<Url> {
    if uri.trim().is_empty() {
        return Err(Error::InvalidBaseUri {
            uri: uri.to_string(),
            reason: "base URI is required".to_string(),
        });
    }
    let url = Url::parse(uri).map_err(|e| Error::InvalidBaseUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidBaseUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    Ok(url)
}
