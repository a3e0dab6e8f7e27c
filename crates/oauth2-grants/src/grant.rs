//! Grant selection
//!
//! Which OAuth2 grant a client uses is decided once, when the client is
//! built, from which credential fields are present:
//!
//! 1. `code` present → authorization code
//! 2. `username` and `password` present → resource owner password
//! 3. otherwise → client credentials
//!
//! A caller-supplied custom grant bypasses both validation and selection.
//! A refresh step can be layered over whichever grant was chosen.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::CredentialSet;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::token::{TokenEndpoint, TokenResponse};

/// Contract for custom OAuth2 grants.
///
/// A grant produces a token from the credential set using the handshake
/// client. Uses `Pin<Box<dyn Future>>` so grants can be held as `Arc<dyn Grant>`.
pub trait Grant: Send + Sync {
    /// `grant_type` name, used in logs and metrics labels.
    fn grant_type(&self) -> &str;

    fn fetch_token<'a>(
        &'a self,
        endpoint: &'a TokenEndpoint,
        credentials: &'a CredentialSet,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

/// The primary grant a client acquires tokens with.
#[derive(Clone)]
pub enum GrantType {
    AuthorizationCode,
    PasswordCredentials,
    ClientCredentials,
    Custom(Arc<dyn Grant>),
}

impl GrantType {
    pub fn name(&self) -> &str {
        match self {
            Self::AuthorizationCode => GRANT_AUTHORIZATION_CODE,
            Self::PasswordCredentials => GRANT_PASSWORD,
            Self::ClientCredentials => GRANT_CLIENT_CREDENTIALS,
            Self::Custom(grant) => grant.grant_type(),
        }
    }

    /// Acquire a fresh token with this grant.
    pub async fn fetch_token(
        &self,
        endpoint: &TokenEndpoint,
        credentials: &CredentialSet,
    ) -> Result<TokenResponse> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        let extras: &[&'static str] = match self {
            Self::Custom(grant) => return grant.fetch_token(endpoint, credentials).await,
            Self::AuthorizationCode => {
                params.push((CODE, required(credentials, CODE)?));
                &[REDIRECT_URI, SCOPE, STATE]
            }
            Self::PasswordCredentials => {
                params.push((USERNAME, required(credentials, USERNAME)?));
                params.push((PASSWORD, required(credentials, PASSWORD)?));
                &[SCOPE]
            }
            Self::ClientCredentials => &[SCOPE],
        };
        push_client_auth(&mut params, credentials)?;
        push_present(&mut params, credentials, extras);
        endpoint.request_token(self.name(), &params).await
    }
}

impl PartialEq for GrantType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AuthorizationCode, Self::AuthorizationCode)
            | (Self::PasswordCredentials, Self::PasswordCredentials)
            | (Self::ClientCredentials, Self::ClientCredentials) => true,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationCode => write!(f, "AuthorizationCode"),
            Self::PasswordCredentials => write!(f, "PasswordCredentials"),
            Self::ClientCredentials => write!(f, "ClientCredentials"),
            Self::Custom(grant) => write!(f, "Custom({})", grant.grant_type()),
        }
    }
}

/// Renews an access token from a refresh token (RFC 6749 §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshTokenGrant;

impl RefreshTokenGrant {
    pub fn name(&self) -> &'static str {
        GRANT_REFRESH_TOKEN
    }

    pub async fn fetch_token(
        &self,
        endpoint: &TokenEndpoint,
        credentials: &CredentialSet,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let mut params: Vec<(&str, &str)> = vec![(REFRESH_TOKEN, refresh_token)];
        push_client_auth(&mut params, credentials)?;
        push_present(&mut params, credentials, &[SCOPE]);
        endpoint.request_token(self.name(), &params).await
    }
}

/// The resolved grant plus an optional refresh step.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantChain {
    pub grant: GrantType,
    pub refresh: Option<RefreshTokenGrant>,
}

impl GrantChain {
    pub fn uses_refresh(&self) -> bool {
        self.refresh.is_some()
    }
}

/// Decide the grant chain for `credentials`.
///
/// Without a custom grant the set must carry `client_id` and `client_secret`
/// (`scope`, `state`, `redirect_uri` and `code` are optional); a failure is
/// returned as `Error::CredentialValidation`. A custom grant is used
/// verbatim and the credentials are not inspected.
pub fn resolve(
    credentials: &CredentialSet,
    custom: Option<Arc<dyn Grant>>,
    uses_refresh: bool,
) -> Result<GrantChain> {
    let grant = match custom {
        Some(grant) => GrantType::Custom(grant),
        None => {
            common::check(REQUIRED_FIELDS, credentials, OPTIONAL_FIELDS)
                .into_result("oauth2", REQUIRED_FIELDS)?;
            select(credentials)
        }
    };
    Ok(GrantChain {
        grant,
        refresh: uses_refresh.then_some(RefreshTokenGrant),
    })
}

fn select(credentials: &CredentialSet) -> GrantType {
    if credentials.contains(CODE) {
        GrantType::AuthorizationCode
    } else if credentials.contains(USERNAME) && credentials.contains(PASSWORD) {
        GrantType::PasswordCredentials
    } else {
        GrantType::ClientCredentials
    }
}

fn required<'c>(credentials: &'c CredentialSet, field: &'static str) -> Result<&'c str> {
    credentials.get(field).ok_or(Error::MissingField(field))
}

fn push_client_auth<'c>(
    params: &mut Vec<(&'static str, &'c str)>,
    credentials: &'c CredentialSet,
) -> Result<()> {
    params.push((CLIENT_ID, required(credentials, CLIENT_ID)?));
    params.push((CLIENT_SECRET, required(credentials, CLIENT_SECRET)?));
    Ok(())
}

fn push_present<'c>(
    params: &mut Vec<(&'static str, &'c str)>,
    credentials: &'c CredentialSet,
    fields: &[&'static str],
) {
    for field in fields {
        if let Some(value) = credentials.get(field) {
            params.push((*field, value));
        }
    }
}
