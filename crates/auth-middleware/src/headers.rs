//! Request-default header injection
//!
//! Client-level default headers (including the Bearer `Authorization` header
//! the factory injects) are applied to every request before the middleware
//! stack runs. A header already set on the individual request always wins.

use std::collections::BTreeMap;
use std::str::FromStr;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Insert each default header that the request does not already carry.
///
/// Invalid names or values are skipped with a warning rather than failing the
/// request; the remaining defaults still apply.
pub fn apply_default_headers(headers: &mut HeaderMap, defaults: &BTreeMap<String, String>) {
    for (name, value) in defaults {
        let header_name = match HeaderName::from_str(name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid default header name");
                continue;
            }
        };
        if headers.contains_key(&header_name) {
            continue;
        }
        let header_value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid default header value");
                continue;
            }
        };
        headers.insert(header_name, header_value);
    }
}

/// Check that every default header name and value is legal on the wire.
///
/// Run once when a client is built so a bad default (for example a Bearer
/// token containing a newline) fails construction instead of being dropped
/// from every request.
pub fn validate_default_headers(defaults: &BTreeMap<String, String>) -> crate::Result<()> {
    for (name, value) in defaults {
        HeaderName::from_str(name).map_err(|e| crate::MiddlewareError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        HeaderValue::from_str(value).map_err(|e| crate::MiddlewareError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Build a sensitive header value (excluded from reqwest's debug output).
pub(crate) fn sensitive_value(name: &str, value: &str) -> crate::Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value).map_err(|e| crate::MiddlewareError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    header.set_sensitive(true);
    Ok(header)
}
