//! Client build counters
//!
//! - `client_factory_builds_total` (counter): labels `scheme`, `outcome`
//!
//! The library never installs a recorder; the embedding binary decides
//! whether and where these are exported.

/// Record one factory call and how it ended.
pub fn record_build(scheme: &str, outcome: &str) {
    metrics::counter!("client_factory_builds_total", "scheme" => scheme.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}
