//! HTTP Digest authentication (RFC 7616, RFC 2617)
//!
//! Challenge-response: the first request goes out without credentials, the
//! server answers `401` with a `WWW-Authenticate: Digest` challenge, and the
//! request is resent with a computed response. The challenge is then kept and
//! reused preemptively, incrementing the nonce count each time, until the
//! server issues a new one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use common::Secret;
use md5::{Digest, Md5};
use rand::RngExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::headers::sensitive_value;
use crate::{ChallengeOutcome, Middleware, MiddlewareError, Result, find_challenge, hex};

/// Hash algorithm named by the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "MD5-SESS" => Some(Self::Md5Sess),
            "SHA-256" => Some(Self::Sha256),
            "SHA-256-SESS" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex(&Md5::digest(data.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex(&Sha256::digest(data.as_bytes())),
        }
    }
}

/// Parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// `Some("auth")` when the server offers qop=auth; `None` for RFC 2069 servers
    pub qop: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse the auth-params that follow `Digest ` in the header.
    pub fn parse(params: &str) -> Result<Self> {
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut qop = None;
        let mut stale = false;

        for (key, value) in parse_auth_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => {
                    algorithm = DigestAlgorithm::parse(&value).ok_or_else(|| {
                        MiddlewareError::Challenge(format!("unsupported digest algorithm {value}"))
                    })?;
                }
                "qop" => {
                    let offered: Vec<&str> = value.split(',').map(str::trim).collect();
                    if !offered.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
                        return Err(MiddlewareError::Challenge(format!(
                            "unsupported digest qop {value}"
                        )));
                    }
                    qop = Some("auth".to_string());
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| MiddlewareError::Challenge("digest realm missing".into()))?,
            nonce: nonce.ok_or_else(|| MiddlewareError::Challenge("digest nonce missing".into()))?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    /// Compute the `response` value for one request.
    pub fn response(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;
        let mut ha1 = alg.hash(&format!("{username}:{}:{password}", self.realm));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = alg.hash(&format!("{method}:{uri}"));

        match &self.qop {
            Some(qop) => alg.hash(&format!(
                "{ha1}:{}:{nonce_count:08x}:{cnonce}:{qop}:{ha2}",
                self.nonce
            )),
            None => alg.hash(&format!("{ha1}:{}:{ha2}", self.nonce)),
        }
    }
}

#[derive(Debug)]
struct Session {
    challenge: DigestChallenge,
    nonce_count: u32,
}

/// Digest credentials plus the most recent server challenge.
pub struct DigestAuth {
    username: String,
    password: Secret<String>,
    session: Mutex<Option<Session>>,
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            username: username.into(),
            password,
            session: Mutex::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn authorize(&self, request: &mut reqwest::Request) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| MiddlewareError::Challenge("digest session lock poisoned".into()))?;
        let Some(session) = guard.as_mut() else {
            // No challenge yet: the first request goes out unauthenticated.
            return Ok(());
        };
        let Some(nonce_count) = session.nonce_count.checked_add(1) else {
            // Nonce count exhausted: drop the session and let the server issue a new nonce.
            debug!(realm = %session.challenge.realm, "digest nonce count exhausted, awaiting fresh challenge");
            *guard = None;
            return Ok(());
        };
        session.nonce_count = nonce_count;

        let url = request.url();
        let uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let cnonce = generate_cnonce();
        let challenge = &session.challenge;
        let response = challenge.response(
            &self.username,
            self.password.expose_str(),
            request.method().as_str(),
            &uri,
            session.nonce_count,
            &cnonce,
        );

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", algorithm={}, response=\"{response}\"",
            quote(&self.username),
            quote(&challenge.realm),
            quote(&challenge.nonce),
            challenge.algorithm.name(),
        );
        if let Some(qop) = &challenge.qop {
            value.push_str(&format!(
                ", qop={qop}, nc={:08x}, cnonce=\"{cnonce}\"",
                session.nonce_count
            ));
        }
        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }

        let header = sensitive_value("authorization", &value)?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(())
    }

    fn accept_challenge(&self, headers: &HeaderMap) -> Result<ChallengeOutcome> {
        let Some(params) = find_challenge(headers, "Digest") else {
            return Ok(ChallengeOutcome::Ignore);
        };
        let challenge = DigestChallenge::parse(params)?;

        let mut guard = self
            .session
            .lock()
            .map_err(|_| MiddlewareError::Challenge("digest session lock poisoned".into()))?;

        // Same nonce and not stale: the server rejected our credentials.
        let rejected = guard.as_ref().is_some_and(|existing| {
            existing.challenge.nonce == challenge.nonce && !challenge.stale
        });
        if rejected {
            warn!(username = %self.username, realm = %challenge.realm, "digest credentials rejected");
            return Ok(ChallengeOutcome::Ignore);
        }

        debug!(realm = %challenge.realm, algorithm = challenge.algorithm.name(), stale = challenge.stale, "accepted digest challenge");
        *guard = Some(Session {
            challenge,
            nonce_count: 0,
        });
        Ok(ChallengeOutcome::Retry)
    }
}

impl Middleware for DigestAuth {
    fn id(&self) -> &str {
        "digest"
    }

    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = self.authorize(request);
        Box::pin(async move { result })
    }

    fn handle_challenge<'a>(
        &'a self,
        _status: StatusCode,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<ChallengeOutcome>> + Send + 'a>> {
        let result = self.accept_challenge(headers);
        Box::pin(async move { result })
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "scheme": "digest", "username": self.username })
    }
}

fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);
    hex(&bytes)
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split `key=value, key="quoted, value"` auth-params. Keys are lowercased.
fn parse_auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut out = String::new();
            let mut end = quoted.len();
            let mut escaped = false;
            for (i, c) in quoted.char_indices() {
                if escaped {
                    out.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = i + 1;
                    break;
                } else {
                    out.push(c);
                }
            }
            rest = &quoted[end..];
            out
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim().to_string();
            rest = &rest[end..];
            value
        };

        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        params.push((key, value));
    }

    params
}
