//! Token endpoint handshake client
//!
//! Every grant ends in the same interaction: a form-encoded POST to the
//! token endpoint (the base URI the grants were built for) and a JSON token
//! response. The handshake client is separate from the client the caller
//! eventually uses; it carries no authentication middleware of its own.

use std::time::{Duration, Instant};

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{EXPIRY_LEEWAY_SECS, TOKEN_REQUEST_TIMEOUT_SECS};
use crate::error::{Error, Result};

/// Response from the token endpoint (RFC 6749 §5.1).
///
/// `expires_in` is a delta in seconds from the response time. Only
/// `access_token` is mandatory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// An access token held in memory by the middleware that acquired it.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: Secret<String>,
    refresh_token: Option<Secret<String>>,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Stamp a token response with its absolute expiry, measured from now.
    /// An `expires_in` too large to represent is treated as no local expiry.
    pub fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        Self {
            value: Secret::new(response.access_token),
            refresh_token: response.refresh_token.map(Secret::new),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        self.value.expose_str()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_str())
    }

    /// True once the token is within the expiry leeway. Tokens without an
    /// `expires_in` never expire locally; the server's `401` is authoritative.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now()
                .checked_add(Duration::from_secs(EXPIRY_LEEWAY_SECS))
                .is_none_or(|deadline| deadline >= at),
            None => false,
        }
    }
}

/// Handshake client bound to a token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
    url: Url,
}

impl TokenEndpoint {
    /// Build a handshake client for `uri`, which must be an absolute
    /// `http`/`https` URL.
    pub fn new(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidTokenEndpoint {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidTokenEndpoint {
                uri: uri.to_string(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST `params` as a form and decode the token response.
    ///
    /// `401`/`403` means the credentials (or refresh token) were rejected and
    /// maps to `InvalidCredentials`; any other non-success status is a
    /// `TokenExchange` failure carrying the status and body.
    pub async fn request_token(
        &self,
        grant_type: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        form.push(("grant_type", grant_type));
        form.extend_from_slice(params);

        debug!(grant = grant_type, endpoint = %self.url, "requesting access token");
        let result = self.send(&form).await;
        crate::metrics::record_token_request(
            grant_type,
            match &result {
                Ok(_) => "success",
                Err(Error::InvalidCredentials(_)) => "rejected",
                Err(_) => "error",
            },
        );
        result
    }

    async fn send(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(self.url.clone()).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "token endpoint rejected credentials ({status}): {body}"
                )));
            }

            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
    }
}
