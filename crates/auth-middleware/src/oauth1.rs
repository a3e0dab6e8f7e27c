//! OAuth 1.0a request signing (RFC 5849)
//!
//! Every request is signed with the consumer and token credentials. The
//! signature covers the method, the normalized base URL, and every query,
//! form-body and protocol parameter, so the signer runs after any other layer
//! that rewrites the URL.

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use common::Secret;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::RngExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode, Url};
use sha1::Sha1;
use sha2::Sha256;

use crate::headers::sensitive_value;
use crate::{ChallengeOutcome, Middleware, MiddlewareError, Result, unix_now};

/// RFC 3986 unreserved characters stay as-is; everything else is encoded.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// How `oauth_signature` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureMethod {
    #[default]
    HmacSha1,
    HmacSha256,
    Plaintext,
}

impl SignatureMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
            Self::Plaintext => "PLAINTEXT",
        }
    }
}

/// Where the protocol parameters travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    Header,
    Query,
}

/// Request-signing middleware seeded with the four OAuth1 credentials.
#[derive(Debug, Clone)]
pub struct OAuth1Signer {
    consumer_key: String,
    consumer_secret: Secret<String>,
    token: String,
    token_secret: Secret<String>,
    signature_method: SignatureMethod,
    placement: Placement,
    realm: Option<String>,
}

impl OAuth1Signer {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: Secret<String>,
        token: impl Into<String>,
        token_secret: Secret<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret,
            token: token.into(),
            token_secret,
            signature_method: SignatureMethod::default(),
            placement: Placement::default(),
            realm: None,
        }
    }

    pub fn with_signature_method(mut self, method: SignatureMethod) -> Self {
        self.signature_method = method;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    pub fn consumer_secret(&self) -> &Secret<String> {
        &self.consumer_secret
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_secret(&self) -> &Secret<String> {
        &self.token_secret
    }

    pub fn signature_method(&self) -> SignatureMethod {
        self.signature_method
    }

    /// Sign `request` with an explicit nonce and timestamp.
    pub fn sign(&self, request: &mut reqwest::Request, nonce: &str, timestamp: u64) -> Result<()> {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                self.signature_method.name().to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_token".to_string(), self.token.clone()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];

        let mut all_params: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        all_params.extend(form_body_params(request));
        all_params.extend(oauth_params.iter().cloned());

        let base = signature_base_string(request.method(), request.url(), &all_params);
        oauth_params.push(("oauth_signature".to_string(), self.signature(&base)?));

        match self.placement {
            Placement::Header => {
                let header = self.authorization_header(&oauth_params);
                let value = sensitive_value("authorization", &header)?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Placement::Query => {
                let mut pairs = request.url_mut().query_pairs_mut();
                for (k, v) in &oauth_params {
                    pairs.append_pair(k, v);
                }
            }
        }
        Ok(())
    }

    fn signature(&self, base: &str) -> Result<String> {
        let key = format!(
            "{}&{}",
            encode(self.consumer_secret.expose_str()),
            encode(self.token_secret.expose_str())
        );
        let signature = match self.signature_method {
            SignatureMethod::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
                    .map_err(|e| MiddlewareError::Signing(e.to_string()))?;
                mac.update(base.as_bytes());
                STANDARD.encode(mac.finalize().into_bytes())
            }
            SignatureMethod::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| MiddlewareError::Signing(e.to_string()))?;
                mac.update(base.as_bytes());
                STANDARD.encode(mac.finalize().into_bytes())
            }
            SignatureMethod::Plaintext => key,
        };
        Ok(signature)
    }

    fn authorization_header(&self, oauth_params: &[(String, String)]) -> String {
        let mut parts = Vec::with_capacity(oauth_params.len() + 1);
        if let Some(realm) = &self.realm {
            parts.push(format!("realm=\"{}\"", encode(realm)));
        }
        let mut sorted: Vec<&(String, String)> = oauth_params.iter().collect();
        sorted.sort();
        for (k, v) in sorted {
            parts.push(format!("{}=\"{}\"", encode(k), encode(v)));
        }
        format!("OAuth {}", parts.join(", "))
    }
}

impl Middleware for OAuth1Signer {
    fn id(&self) -> &str {
        "oauth1"
    }

    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = self.sign(request, &generate_nonce(), unix_now());
        Box::pin(async move { result })
    }

    fn handle_challenge<'a>(
        &'a self,
        _status: StatusCode,
        _headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<ChallengeOutcome>> + Send + 'a>> {
        // Signatures are deterministic given the credentials; retrying cannot help.
        Box::pin(async { Ok(ChallengeOutcome::Ignore) })
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "scheme": "oauth1",
            "consumer_key": self.consumer_key,
            "token": self.token,
            "signature_method": self.signature_method.name(),
            "placement": match self.placement {
                Placement::Header => "header",
                Placement::Query => "query",
            },
            "realm": self.realm,
        })
    }
}

/// `METHOD&enc(base_url)&enc(sorted_params)`
pub fn signature_base_string(method: &Method, url: &Url, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "oauth_signature")
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.as_str().to_ascii_uppercase(),
        encode(&base_url(url)),
        encode(&param_string)
    )
}

/// Scheme, host, non-default port and path; no query or fragment.
fn base_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    format!("{}://{host}{port}{}", url.scheme(), url.path())
}

fn form_body_params(request: &reqwest::Request) -> Vec<(String, String)> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE));
    if !is_form {
        return Vec::new();
    }
    request
        .body()
        .and_then(|body| body.as_bytes())
        .map(|bytes| {
            url::form_urlencoded::parse(bytes)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> OAuth1Signer {
        OAuth1Signer::new("k", Secret::from("s"), "t", Secret::from("ts"))
    }

    fn header(request: &reqwest::Request) -> String {
        request
            .headers()
            .get(AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Published example from the Twitter API signing guide.
    #[test]
    fn signs_reference_request() {
        let signer = OAuth1Signer::new(
            "xvz1evFS4wEEPTGEFPHBog",
            Secret::from("kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw"),
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            Secret::from("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE"),
        );
        let url = "https://api.twitter.com/1.1/statuses/update.json?include_entities=true"
            .parse()
            .unwrap();
        let mut request = reqwest::Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static(FORM_CONTENT_TYPE),
        );
        *request.body_mut() = Some(reqwest::Body::from(
            "status=Hello%20Ladies%20%2b%20Gentlemen%2c%20a%20signed%20OAuth%20request%21",
        ));

        signer
            .sign(
                &mut request,
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                1318622958,
            )
            .unwrap();

        let value = header(&request);
        assert!(
            value.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""),
            "got: {value}"
        );
    }

    #[test]
    fn base_string_sorts_and_encodes_parameters() {
        let url: Url = "https://API.Example.com:443/items?a=1".parse().unwrap();
        let params = vec![
            ("oauth_token".to_string(), "t".to_string()),
            ("a".to_string(), "1".to_string()),
            ("oauth_consumer_key".to_string(), "k".to_string()),
        ];
        assert_eq!(
            signature_base_string(&Method::GET, &url, &params),
            "GET&https%3A%2F%2Fapi.example.com%2Fitems&a%3D1%26oauth_consumer_key%3Dk%26oauth_token%3Dt"
        );
    }

    #[test]
    fn base_url_keeps_non_default_port() {
        let url: Url = "http://example.com:8080/r%20v/x?q=1#frag".parse().unwrap();
        assert_eq!(base_url(&url), "http://example.com:8080/r%20v/x");
    }

    #[test]
    fn signs_simple_get() {
        let mut request = reqwest::Request::new(
            Method::GET,
            "https://api.example.com/items?a=1".parse().unwrap(),
        );
        signer().sign(&mut request, "n", 1).unwrap();

        let value = header(&request);
        assert!(value.starts_with("OAuth "), "got: {value}");
        assert!(value.contains("oauth_consumer_key=\"k\""));
        assert!(value.contains("oauth_token=\"t\""));
        assert!(value.contains("oauth_nonce=\"n\""));
        assert!(value.contains("oauth_timestamp=\"1\""));
        assert!(value.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(value.contains("oauth_version=\"1.0\""));
        assert!(
            value.contains("oauth_signature=\"%2BK3pf22grf5MYp8sFiWA4rpLjYc%3D\""),
            "got: {value}"
        );
    }

    #[test]
    fn plaintext_signature_is_the_key() {
        let mut request =
            reqwest::Request::new(Method::GET, "https://api.example.com/".parse().unwrap());
        signer()
            .with_signature_method(SignatureMethod::Plaintext)
            .sign(&mut request, "n", 1)
            .unwrap();
        assert!(header(&request).contains("oauth_signature=\"s%26ts\""));
    }

    #[test]
    fn query_placement_appends_parameters() {
        let mut request = reqwest::Request::new(
            Method::GET,
            "https://api.example.com/items?a=1".parse().unwrap(),
        );
        signer()
            .with_placement(Placement::Query)
            .sign(&mut request, "n", 1)
            .unwrap();

        assert!(request.headers().get(AUTHORIZATION).is_none());
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("a".into(), "1".into())));
        assert!(pairs.contains(&("oauth_consumer_key".into(), "k".into())));
        assert!(pairs.iter().any(|(k, _)| k == "oauth_signature"));
    }

    #[test]
    fn realm_leads_the_header() {
        let mut request =
            reqwest::Request::new(Method::GET, "https://api.example.com/".parse().unwrap());
        signer()
            .with_realm("Photos")
            .sign(&mut request, "n", 1)
            .unwrap();
        assert!(header(&request).starts_with("OAuth realm=\"Photos\", oauth_consumer_key="));
    }

    #[test]
    fn ignores_non_form_bodies() {
        let mut request =
            reqwest::Request::new(Method::POST, "https://api.example.com/".parse().unwrap());
        request.headers_mut().insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        *request.body_mut() = Some(reqwest::Body::from("{\"a\":1}"));
        assert!(form_body_params(&request).is_empty());
    }

    #[test]
    fn nonces_are_unique() {
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[tokio::test]
    async fn middleware_signs_every_request() {
        let signer = signer();
        let mut request =
            reqwest::Request::new(Method::GET, "https://api.example.com/".parse().unwrap());
        signer.prepare_request(&mut request).await.unwrap();
        assert!(header(&request).contains("oauth_signature="));
        assert_eq!(signer.describe()["consumer_key"], "k");
        assert_eq!(signer.describe()["token"], "t");
    }
}
