//! OAuth2 bearer middleware
//!
//! Attaches `Authorization: Bearer <access_token>` to every request. The
//! token is acquired lazily on the first request and cached in memory for
//! the life of the client handle (and its clones).
//!
//! Token lifecycle:
//! 1. No usable token → acquire one (refresh grant first when layered and a
//!    refresh token is known, primary grant otherwise or on refresh failure)
//! 2. Cached token still outside the expiry leeway → reuse it
//! 3. Upstream `401` → discard the cached token; the client retries once

use std::future::Future;
use std::pin::Pin;

use auth_middleware::{ChallengeOutcome, Middleware, MiddlewareError};
use common::{CredentialSet, Secret};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::REFRESH_TOKEN;
use crate::error::Result;
use crate::grant::GrantChain;
use crate::token::{AccessToken, TokenEndpoint, TokenResponse};

#[derive(Debug, Default)]
struct TokenState {
    token: Option<AccessToken>,
    refresh_token: Option<Secret<String>>,
}

/// Bearer-token middleware driven by a resolved grant chain.
pub struct OAuth2Middleware {
    endpoint: TokenEndpoint,
    credentials: CredentialSet,
    chain: GrantChain,
    // Held across the token request so concurrent first requests do one handshake.
    state: Mutex<TokenState>,
}

impl OAuth2Middleware {
    /// A `refresh_token` credential field seeds the refresh step.
    pub fn new(endpoint: TokenEndpoint, credentials: CredentialSet, chain: GrantChain) -> Self {
        let refresh_token = credentials.secret(REFRESH_TOKEN).cloned();
        Self {
            endpoint,
            credentials,
            chain,
            state: Mutex::new(TokenState {
                token: None,
                refresh_token,
            }),
        }
    }

    pub fn chain(&self) -> &GrantChain {
        &self.chain
    }

    pub fn endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }

    /// Return a usable access token, acquiring one if needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some(token) = state.token.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.value().to_string());
        }

        let response = self.acquire(&state).await?;
        let token = AccessToken::from_response(response);
        if let Some(refresh) = token.refresh_token() {
            state.refresh_token = Some(Secret::from(refresh));
        }
        let value = token.value().to_string();
        state.token = Some(token);
        Ok(value)
    }

    /// Drop the cached access token. The refresh token, if any, is kept.
    pub async fn invalidate(&self) {
        self.state.lock().await.token = None;
    }

    async fn acquire(&self, state: &TokenState) -> Result<TokenResponse> {
        if let (Some(refresh), Some(refresh_token)) = (&self.chain.refresh, &state.refresh_token) {
            match refresh
                .fetch_token(&self.endpoint, &self.credentials, refresh_token.expose_str())
                .await
            {
                Ok(response) => {
                    debug!(grant = refresh.name(), "access token refreshed");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        grant = self.chain.grant.name(),
                        "token refresh failed, falling back to primary grant"
                    );
                }
            }
        }

        let response = self
            .chain
            .grant
            .fetch_token(&self.endpoint, &self.credentials)
            .await?;
        info!(
            grant = self.chain.grant.name(),
            expires_in = ?response.expires_in,
            "access token acquired"
        );
        Ok(response)
    }
}

impl Middleware for OAuth2Middleware {
    fn id(&self) -> &str {
        "oauth2"
    }

    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = auth_middleware::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.access_token().await?;
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                MiddlewareError::InvalidHeader {
                    name: "authorization".to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            Ok(())
        })
    }

    fn handle_challenge<'a>(
        &'a self,
        status: StatusCode,
        _headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = auth_middleware::Result<ChallengeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            if status != StatusCode::UNAUTHORIZED {
                return Ok(ChallengeOutcome::Ignore);
            }
            debug!(grant = self.chain.grant.name(), "access token rejected, discarding");
            self.invalidate().await;
            Ok(ChallengeOutcome::Retry)
        })
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "scheme": "oauth2",
            "grant": self.chain.grant.name(),
            "refresh": self.chain.uses_refresh(),
            "token_endpoint": self.endpoint.url().as_str(),
        })
    }
}
