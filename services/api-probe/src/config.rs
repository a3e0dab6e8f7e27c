//! Probe profile loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credential values resolve in the order `API_PROBE_CRED_<FIELD>` env vars >
//! `credentials_file` > the `[credentials]` table, so secrets can stay out of
//! the profile itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use client_factory::{AuthScheme, ClientOptions, CredentialSet};
use reqwest::Method;
use serde::Deserialize;

/// Prefix of environment variables that supply credential fields.
pub const CREDENTIAL_ENV_PREFIX: &str = "API_PROBE_CRED_";

/// Mutex to serialize tests that mutate or depend on environment variables,
/// preventing data races when tests run in parallel.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// TOML file holding a string map of credential fields
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    pub client: ClientConfig,
    #[serde(default)]
    pub request: RequestConfig,
    /// `[credentials]` table; file and env overlays are applied at load time.
    #[serde(default)]
    credentials: CredentialSet,
}

/// Client construction settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub scheme: AuthScheme,
    pub base_uri: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// The single request the probe sends
#[derive(Debug, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: default_path(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

impl Config {
    /// Load a profile from a TOML file, then overlay credential env vars.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.client.base_uri.starts_with("http://")
            && !config.client.base_uri.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_uri must start with http:// or https://, got: {}",
                config.client.base_uri
            )));
        }

        if config.client.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if Method::from_bytes(config.request.method.as_bytes()).is_err() {
            return Err(common::Error::Config(format!(
                "invalid request method: {}",
                config.request.method
            )));
        }

        let mut overlay = BTreeMap::new();
        if let Some(ref file) = config.credentials_file {
            overlay.extend(read_credentials_file(file)?);
        }
        overlay.extend(credentials_from_env());
        config.credentials = overlay
            .into_iter()
            .fold(std::mem::take(&mut config.credentials), |set, (name, value)| {
                set.with(name, value)
            });

        Ok(config)
    }

    /// Resolve config file path from CLI arg or API_PROBE_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("API_PROBE_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-probe.toml")
    }

    /// Credential fields after file and env overlays.
    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub fn method(&self) -> Method {
        Method::from_bytes(self.request.method.as_bytes()).unwrap_or(Method::GET)
    }

    /// Request defaults handed to the client factory.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new().with_timeout_secs(self.client.timeout_secs);
        if let Some(secs) = self.client.connect_timeout_secs {
            options = options.with_connect_timeout_secs(secs);
        }
        options.headers = self.client.headers.clone();
        options
    }
}

fn read_credentials_file(path: &Path) -> common::Result<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::CredentialFile(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&contents).map_err(|e| {
        common::Error::CredentialFile(format!(
            "{} is not a table of string fields: {e}",
            path.display()
        ))
    })
}

fn credentials_from_env() -> BTreeMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(CREDENTIAL_ENV_PREFIX)
                .filter(|field| !field.is_empty())
                .map(|field| (field.to_ascii_lowercase(), value))
        })
        .collect()
}
