//! Scheme builders and the `create` dispatcher
//!
//! Every builder follows the same shape: validate the credential set against
//! the scheme's field list, build the scheme's options, merge the caller's
//! request defaults on top, and construct the client. A failed validation
//! never yields a client.

use std::sync::Arc;

use auth_middleware::{HandlerStack, OAuth1Signer};
use common::{CredentialSet, Secret};
use oauth2_grants::{Grant, OAuth2Middleware, TokenEndpoint};
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::options::{AuthConfig, ClientOptions};
use crate::scheme::AuthScheme;

/// Build a client for `scheme`.
///
/// For OAuth2, a handler supplied in `options` is used verbatim; otherwise
/// the default grant stack is resolved from `credentials` (no refresh step,
/// no custom grant).
pub fn create(
    scheme: AuthScheme,
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    match scheme {
        AuthScheme::OAuth1 => oauth1(base_uri, credentials, options),
        AuthScheme::OAuth2 => {
            let options = if options.handler.is_some() {
                options
            } else {
                match oauth2_grants(base_uri, credentials, false, None) {
                    Ok(stack) => options.with_handler(stack),
                    Err(e) => return observe(AuthScheme::OAuth2, Err(e)),
                }
            };
            oauth2(base_uri, options)
        }
        AuthScheme::Basic => basic_auth(base_uri, credentials, options),
        AuthScheme::Digest => digest(base_uri, credentials, options),
        AuthScheme::Ntlm => ntlm(base_uri, credentials, options),
        AuthScheme::Bearer => bearer_token(base_uri, credentials, options),
    }
}

/// OAuth2 client around a handler stack built by [`oauth2_grants`] and
/// passed in `options.handler`.
pub fn oauth2(base_uri: &str, options: ClientOptions) -> Result<ApiClient> {
    if options.handler.is_none() {
        warn!(base_uri, "oauth2 client built without a handler stack; requests will not be authenticated");
    }
    let base = ClientOptions::new()
        .with_base_uri(base_uri)
        .with_auth(AuthConfig::OAuth);
    observe(AuthScheme::OAuth2, ApiClient::build(AuthScheme::OAuth2, base.merge(options)))
}

/// Resolve the OAuth2 grant chain for `credentials` and wrap it in a handler
/// stack whose middleware talks to the token endpoint at `base_uri`.
///
/// A custom grant skips credential validation entirely.
pub fn oauth2_grants(
    base_uri: &str,
    credentials: &CredentialSet,
    uses_refresh: bool,
    custom_grant: Option<Arc<dyn Grant>>,
) -> Result<HandlerStack> {
    let chain = oauth2_grants::resolve(credentials, custom_grant, uses_refresh)?;
    let endpoint = TokenEndpoint::new(base_uri)?;
    info!(
        base_uri,
        grant = chain.grant.name(),
        refresh = chain.uses_refresh(),
        "resolved oauth2 grant"
    );

    let mut stack = HandlerStack::new();
    stack.push(OAuth2Middleware::new(endpoint, credentials.clone(), chain));
    Ok(stack)
}

/// OAuth 1.0a client signing every request with the consumer and token
/// credentials.
pub fn oauth1(
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    let scheme = AuthScheme::OAuth1;
    let result = validate(scheme, credentials).and_then(|()| {
        let signer = OAuth1Signer::new(
            field(credentials, "consumer_key"),
            secret(credentials, "consumer_secret"),
            field(credentials, "token"),
            secret(credentials, "token_secret"),
        );
        let base = ClientOptions::new()
            .with_base_uri(base_uri)
            .with_handler(HandlerStack::new().with(signer))
            .with_auth(AuthConfig::OAuth);
        ApiClient::build(scheme, base.merge(options))
    });
    observe(scheme, result)
}

/// Client sending native basic-auth credentials.
pub fn basic_auth(
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    credential_tuple(AuthScheme::Basic, base_uri, credentials, options, |username, password| {
        AuthConfig::Basic { username, password }
    })
}

/// Client answering Digest challenges. The `digest` field only opts in.
pub fn digest(
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    credential_tuple(AuthScheme::Digest, base_uri, credentials, options, |username, password| {
        AuthConfig::Digest { username, password }
    })
}

/// Client performing the NTLM handshake. The `ntlm` field only opts in.
pub fn ntlm(
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    credential_tuple(AuthScheme::Ntlm, base_uri, credentials, options, |username, password| {
        AuthConfig::Ntlm { username, password }
    })
}

/// Client sending `Authorization: Bearer <token>` as a request default.
pub fn bearer_token(
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
) -> Result<ApiClient> {
    let scheme = AuthScheme::Bearer;
    let result = validate(scheme, credentials).and_then(|()| {
        let base = ClientOptions::new()
            .with_base_uri(base_uri)
            .with_header("Authorization", format!("Bearer {}", field(credentials, "token")));
        ApiClient::build(scheme, base.merge(options))
    });
    observe(scheme, result)
}

fn credential_tuple(
    scheme: AuthScheme,
    base_uri: &str,
    credentials: &CredentialSet,
    options: ClientOptions,
    auth: impl FnOnce(String, Secret<String>) -> AuthConfig,
) -> Result<ApiClient> {
    let result = validate(scheme, credentials).and_then(|()| {
        let base = ClientOptions::new()
            .with_base_uri(base_uri)
            .with_auth(auth(field(credentials, "username"), secret(credentials, "password")));
        ApiClient::build(scheme, base.merge(options))
    });
    observe(scheme, result)
}

fn validate(scheme: AuthScheme, credentials: &CredentialSet) -> Result<()> {
    common::check(scheme.required_fields(), credentials, scheme.optional_fields())
        .into_result(scheme.name(), scheme.required_fields())?;
    Ok(())
}

// Only called after validation, so the field is present.
fn field(credentials: &CredentialSet, name: &str) -> String {
    credentials.get(name).unwrap_or_default().to_string()
}

fn secret(credentials: &CredentialSet, name: &str) -> Secret<String> {
    credentials.secret(name).cloned().unwrap_or_else(|| Secret::from(""))
}

fn observe<T>(scheme: AuthScheme, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => {
            info!(scheme = scheme.name(), "built credentialed client");
            crate::metrics::record_build(scheme.name(), "success");
        }
        Err(Error::CredentialValidation(e)) => {
            warn!(scheme = scheme.name(), missing = ?e.missing, "credential validation failed");
            crate::metrics::record_build(scheme.name(), "invalid_credentials");
        }
        Err(e) => {
            warn!(scheme = scheme.name(), error = %e, "client construction failed");
            crate::metrics::record_build(scheme.name(), "error");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    use auth_middleware::{Middleware, Placement};
    use oauth2_grants::TokenResponse;
    use reqwest::StatusCode;
    use reqwest::header::AUTHORIZATION;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE: &str = "https://api.example.com";

    fn creds(pairs: &[(&str, &str)]) -> CredentialSet {
        pairs.iter().copied().collect()
    }

    fn full_creds(scheme: AuthScheme) -> CredentialSet {
        scheme
            .required_fields()
            .iter()
            .map(|field| (*field, format!("{field}-value")))
            .collect()
    }

    fn validation_error(result: Result<ApiClient>) -> common::CredentialValidationError {
        match result {
            Err(Error::CredentialValidation(e)) => e,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected validation failure"),
        }
    }

    #[test]
    fn empty_credentials_fail_for_every_scheme() {
        for scheme in AuthScheme::ALL {
            let err = validation_error(create(
                scheme,
                BASE,
                &CredentialSet::new(),
                ClientOptions::new(),
            ));
            assert_eq!(err.scheme, scheme.name());
            let required: Vec<String> =
                scheme.required_fields().iter().map(|f| f.to_string()).collect();
            assert_eq!(err.required, required);
            assert_eq!(err.missing.len(), required.len(), "{scheme}");
            let message = err.to_string();
            for field in scheme.required_fields() {
                assert!(message.contains(field), "{scheme}: {message}");
            }
        }
    }

    #[test]
    fn exact_required_fields_succeed_for_every_scheme() {
        for scheme in AuthScheme::ALL {
            let client = create(scheme, BASE, &full_creds(scheme), ClientOptions::new()).unwrap();
            assert_eq!(client.scheme(), scheme);
            assert_eq!(client.base_uri().as_str(), "https://api.example.com/");
        }
    }

    #[test]
    fn extra_field_is_tolerated() {
        for scheme in [
            AuthScheme::Basic,
            AuthScheme::Digest,
            AuthScheme::Ntlm,
            AuthScheme::Bearer,
        ] {
            let set = full_creds(scheme).with("unexpected", "x");
            assert!(create(scheme, BASE, &set, ClientOptions::new()).is_ok(), "{scheme}");
        }
    }

    #[test]
    fn oauth2_optional_subsets_succeed() {
        let base = full_creds(AuthScheme::OAuth2);
        for optional in [
            vec![],
            vec!["scope"],
            vec!["state", "redirect_uri"],
            vec!["scope", "state", "redirect_uri", "code"],
        ] {
            let set = optional
                .iter()
                .fold(base.clone(), |set, field| set.with(*field, "v"));
            assert!(create(AuthScheme::OAuth2, BASE, &set, ClientOptions::new()).is_ok());
        }
    }

    #[test]
    fn bearer_token_sets_default_header() {
        let client = bearer_token(BASE, &creds(&[("token", "abc123")]), ClientOptions::new()).unwrap();
        assert_eq!(
            client.default_headers().get("Authorization").map(String::as_str),
            Some("Bearer abc123")
        );
        assert!(client.handler().is_empty());
    }

    #[test]
    fn caller_authorization_header_overrides_bearer_default() {
        let client = bearer_token(
            BASE,
            &creds(&[("token", "abc123")]),
            ClientOptions::new().with_header("authorization", "Bearer override"),
        )
        .unwrap();
        assert_eq!(client.default_headers().len(), 1);
        assert_eq!(client.default_headers()["authorization"], "Bearer override");
    }

    #[test]
    fn bearer_token_with_newline_fails_to_build() {
        let result = bearer_token(BASE, &creds(&[("token", "abc\ndef")]), ClientOptions::new());
        assert!(matches!(
            result,
            Err(Error::Middleware(auth_middleware::MiddlewareError::InvalidHeader { .. }))
        ));
    }

    #[test]
    fn basic_digest_ntlm_attach_credential_tuple() {
        let cases = [
            (AuthScheme::Basic, "basic"),
            (AuthScheme::Digest, "digest"),
            (AuthScheme::Ntlm, "ntlm"),
        ];
        for (scheme, mode) in cases {
            let client = create(
                scheme,
                BASE,
                &full_creds(scheme).with("username", "alice"),
                ClientOptions::new(),
            )
            .unwrap();
            assert_eq!(client.options().auth.as_ref().unwrap().mode(), mode);
            assert_eq!(client.handler().ids(), vec![mode]);
            assert_eq!(client.handler().describe()[0]["username"], "alice");
        }
    }

    #[test]
    fn oauth1_keeps_base_uri_and_signer() {
        let client = oauth1(
            "https://api.example.com/",
            &creds(&[
                ("consumer_key", "ck"),
                ("consumer_secret", "cs"),
                ("token", "t"),
                ("token_secret", "ts"),
            ]),
            ClientOptions::new(),
        )
        .unwrap();

        assert_eq!(client.base_uri().as_str(), "https://api.example.com/");
        assert_eq!(client.options().auth, Some(AuthConfig::OAuth));
        assert_eq!(client.handler().ids(), vec!["oauth1"]);
        let described = client.handler().describe();
        assert_eq!(described[0]["consumer_key"], "ck");
        assert_eq!(described[0]["token"], "t");
    }

    #[test]
    fn oauth1_missing_token_secret_is_named() {
        let err = validation_error(oauth1(
            "https://api.example.com/",
            &creds(&[("consumer_key", "ck"), ("consumer_secret", "cs"), ("token", "t")]),
            ClientOptions::new(),
        ));
        assert_eq!(err.scheme, "oauth1");
        assert_eq!(err.missing.iter().collect::<Vec<_>>(), vec!["token_secret"]);
        assert!(err.to_string().contains("token_secret"));
    }

    #[test]
    fn oauth2_grants_with_refresh_describes_chain() {
        let stack = oauth2_grants(
            BASE,
            &creds(&[("client_id", "a"), ("client_secret", "b"), ("code", "c")]),
            true,
            None,
        )
        .unwrap();
        let described = stack.describe();
        assert_eq!(described[0]["grant"], "authorization_code");
        assert_eq!(described[0]["refresh"], true);
    }

    #[test]
    fn oauth2_grants_failure_is_unwrapped_validation_error() {
        let err = oauth2_grants(BASE, &creds(&[("client_id", "a")]), false, None).unwrap_err();
        match err {
            Error::CredentialValidation(e) => assert!(e.missing.contains("client_secret")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oauth2_grants_rejects_relative_base_uri() {
        let err = oauth2_grants(
            "/token",
            &creds(&[("client_id", "a"), ("client_secret", "b")]),
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBaseUri { .. }));
    }

    struct FixedGrant;

    impl Grant for FixedGrant {
        fn grant_type(&self) -> &str {
            "urn:example:fixed"
        }

        fn fetch_token<'a>(
            &'a self,
            _endpoint: &'a TokenEndpoint,
            _credentials: &'a CredentialSet,
        ) -> Pin<Box<dyn Future<Output = oauth2_grants::Result<TokenResponse>> + Send + 'a>> {
            Box::pin(async {
                Ok(TokenResponse {
                    access_token: "fixed-token".into(),
                    token_type: None,
                    expires_in: None,
                    refresh_token: None,
                    scope: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn custom_grant_bypasses_validation() {
        let stack = oauth2_grants(BASE, &CredentialSet::new(), false, Some(Arc::new(FixedGrant)))
            .unwrap();
        assert_eq!(stack.describe()[0]["grant"], "urn:example:fixed");

        let mut request = reqwest::Request::new(reqwest::Method::GET, BASE.parse().unwrap());
        stack.prepare(&mut request).await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer fixed-token");
    }

    #[test]
    fn create_oauth2_uses_caller_handler_verbatim() {
        let handler = HandlerStack::new().with(auth_middleware::BasicAuth::new("u", Secret::from("p")));
        let client = create(
            AuthScheme::OAuth2,
            BASE,
            &CredentialSet::new(),
            ClientOptions::new().with_handler(handler),
        )
        .unwrap();
        assert_eq!(client.handler().ids(), vec!["basic"]);
    }

    #[test]
    fn oauth2_without_handler_still_builds() {
        let client = oauth2(BASE, ClientOptions::new()).unwrap();
        assert!(client.handler().is_empty());
        assert_eq!(client.options().auth, Some(AuthConfig::OAuth));
    }

    #[test]
    fn identical_calls_build_identical_configuration() {
        for scheme in AuthScheme::ALL {
            let set = full_creds(scheme);
            let options = ClientOptions::new()
                .with_timeout_secs(15)
                .with_header("x-trace", "1")
                .with_extra("verify", serde_json::json!(true));
            let a = create(scheme, BASE, &set, options.clone()).unwrap();
            let b = create(scheme, BASE, &set, options).unwrap();
            assert_eq!(a.describe(), b.describe(), "{scheme}");
        }
    }

    #[test]
    fn caller_options_take_precedence() {
        let client = basic_auth(
            BASE,
            &full_creds(AuthScheme::Basic),
            ClientOptions::new()
                .with_base_uri("https://other.example.com")
                .with_timeout_secs(7),
        )
        .unwrap();
        assert_eq!(client.base_uri().as_str(), "https://other.example.com/");
        assert_eq!(client.options().timeout_secs, Some(7));
    }

    #[test]
    fn credentials_are_not_modified() {
        let set = full_creds(AuthScheme::Basic).with("extra", "x");
        let before = set.clone();
        basic_auth(BASE, &set, ClientOptions::new()).unwrap();
        assert_eq!(set, before);
    }

    #[tokio::test]
    async fn bearer_header_reaches_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("authorization", "Bearer abc123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = bearer_token(&server.uri(), &creds(&[("token", "abc123")]), ClientOptions::new()).unwrap();
        let response = client.send(client.get("/me").unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oauth1_request_is_signed_with_all_four_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = oauth1(
            &server.uri(),
            &creds(&[
                ("consumer_key", "ck"),
                ("consumer_secret", "cs"),
                ("token", "t"),
                ("token_secret", "ts"),
            ]),
            ClientOptions::new(),
        )
        .unwrap();
        client.send(client.get("/items?a=1").unwrap()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let sent = requests[0].headers.get("authorization").unwrap().to_str().unwrap().to_string();
        let param = |name: &str| -> String {
            let start = sent.find(&format!("{name}=\"")).unwrap() + name.len() + 2;
            let end = start + sent[start..].find('"').unwrap();
            sent[start..end].to_string()
        };

        // Re-sign the same request with the expected credentials and the nonce/timestamp used.
        let expected_signer = OAuth1Signer::new("ck", Secret::from("cs"), "t", Secret::from("ts"))
            .with_placement(Placement::Header);
        let mut replay = reqwest::Request::new(
            reqwest::Method::GET,
            format!("{}/items?a=1", server.uri()).parse().unwrap(),
        );
        expected_signer
            .sign(&mut replay, &param("oauth_nonce"), param("oauth_timestamp").parse().unwrap())
            .unwrap();
        assert_eq!(replay.headers()[AUTHORIZATION].to_str().unwrap(), sent);
        assert_eq!(expected_signer.id(), "oauth1");
    }

    #[tokio::test]
    async fn oauth2_client_acquires_token_lazily() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_lazy",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("authorization", "Bearer at_lazy"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = create(
            AuthScheme::OAuth2,
            &server.uri(),
            &creds(&[("client_id", "id"), ("client_secret", "secret")]),
            ClientOptions::new(),
        )
        .unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());

        for _ in 0..2 {
            let response = client.send(client.get("/data").unwrap()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn oauth2_token_with_unbounded_lifetime_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "expires_in": u64::MAX
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = create(
            AuthScheme::OAuth2,
            &server.uri(),
            &creds(&[("client_id", "id"), ("client_secret", "secret")]),
            ClientOptions::new(),
        )
        .unwrap();
        for _ in 0..2 {
            let response = client.send(client.get("/data").unwrap()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn oauth2_client_reacquires_after_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = create(
            AuthScheme::OAuth2,
            &server.uri(),
            &creds(&[("client_id", "id"), ("client_secret", "secret")]),
            ClientOptions::new(),
        )
        .unwrap();
        let response = client.send(client.get("/data").unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
