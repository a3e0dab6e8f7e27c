//! Token request counters
//!
//! - `oauth2_token_requests_total` (counter): labels `grant`, `outcome`
//!
//! No recorder is installed here; without one these calls are no-ops.

/// Record one token endpoint round trip.
pub fn record_token_request(grant: &str, outcome: &str) {
    metrics::counter!("oauth2_token_requests_total", "grant" => grant.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}
