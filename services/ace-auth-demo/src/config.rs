//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from ACE_AUTH_CLIENT_SECRET env var or
//! client_secret_file, never stored in the TOML directly to avoid leaking
//! secrets.

use ace_auth::AuthFlowConfig;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding the OAuth client secret.
pub const CLIENT_SECRET_ENV: &str = "ACE_AUTH_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthSection,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Where the authorization server sends the browser after logout
    #[serde(default)]
    pub post_logout_redirect: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Browser sessions kept in memory before the oldest is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// `[auth]` table: the flow settings plus where to find the secret
#[derive(Debug, Deserialize)]
pub struct AuthSection {
    #[serde(flatten)]
    pub flow: AuthFlowConfig,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_sessions() -> usize {
    10_000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. ACE_AUTH_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents)?;

        let domain = &config.auth.flow.domain;
        if !domain.starts_with("http://") && !domain.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "domain must start with http:// or https://, got: {domain}"
            )));
        }

        if config.auth.flow.session.cookie_expires_secs == 0 {
            return Err(common::Error::Config(
                "cookie_expires_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.server.max_sessions == 0 {
            return Err(common::Error::Config(
                "max_sessions must be greater than 0".into(),
            ));
        }

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.auth.flow.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.auth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.auth.flow.client_secret = Some(Secret::new(secret));
            }
        }

        config
            .auth
            .flow
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ace-auth-demo.toml")
    }
}
