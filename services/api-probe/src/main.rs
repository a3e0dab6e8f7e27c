//! API probe
//!
//! Small binary that exercises the client factory end to end:
//! 1. Loads a client profile (scheme, base URI, credentials)
//! 2. Builds an authenticated client through `client_factory::create`
//! 3. Sends one request and logs the outcome
//!
//! Exits non-zero when the client cannot be built or the response is not 2xx.

mod config;

use std::time::Instant;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting api-probe");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        scheme = %config.client.scheme,
        base_uri = %config.client.base_uri,
        credential_fields = ?config.credentials().keys().collect::<Vec<_>>(),
        "configuration loaded"
    );

    let status = probe(&config).await?;
    if !status.is_success() {
        anyhow::bail!("probe request returned {status}");
    }
    Ok(())
}

/// Build the client described by `config` and send its request.
async fn probe(config: &Config) -> Result<StatusCode> {
    let client = client_factory::create(
        config.client.scheme,
        &config.client.base_uri,
        config.credentials(),
        config.client_options(),
    )
    .with_context(|| format!("failed to build {} client", config.client.scheme))?;

    info!(client = %client.describe(), "client built");

    let method = config.method();
    let request = client
        .request(method.clone(), &config.request.path)
        .context("failed to build probe request")?;

    let started = Instant::now();
    let response = client
        .send(request)
        .await
        .with_context(|| format!("{method} {} failed", config.request.path))?;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_success() {
        info!(%method, path = %config.request.path, status = status.as_u16(), elapsed_ms, "probe succeeded");
    } else {
        warn!(%method, path = %config.request.path, status = status.as_u16(), elapsed_ms, "probe returned non-success status");
    }
    Ok(status)
}
