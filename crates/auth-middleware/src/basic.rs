//! HTTP Basic authentication (RFC 7617)

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};

use crate::headers::sensitive_value;
use crate::{ChallengeOutcome, Middleware, Result};

/// Native basic-auth credentials attached to every request.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    username: String,
    password: Secret<String>,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Basic base64(username:password)`
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password.expose_str());
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl Middleware for BasicAuth {
    fn id(&self) -> &str {
        "basic"
    }

    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = if request.headers().contains_key(AUTHORIZATION) {
            Ok(())
        } else {
            sensitive_value("authorization", &self.header_value()).map(|value| {
                request.headers_mut().insert(AUTHORIZATION, value);
            })
        };
        Box::pin(async move { result })
    }

    fn handle_challenge<'a>(
        &'a self,
        _status: StatusCode,
        _headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<ChallengeOutcome>> + Send + 'a>> {
        // Basic credentials are sent preemptively; a 401 means they were wrong.
        Box::pin(async { Ok(ChallengeOutcome::Ignore) })
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "scheme": "basic", "username": self.username })
    }
}
