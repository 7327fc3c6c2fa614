//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Response headers removed before relaying to the caller
pub const DEFAULT_STRIPPED_RESPONSE_HEADERS: [&str; 5] =
    ["CF-Ray", "Expect-CT", "Set-Cookie", "Via", "Server"];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the gate starts.
    /// Paths support ~ expansion. Loaded in order; existing variables win.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Credential verification
    pub credential: CredentialConfig,
    /// User directory
    pub directory: DirectoryConfig,
    /// Protected backend
    pub backend: BackendConfig,
    /// How the caller's address is derived
    pub client_address: ClientAddressConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Realm advertised in `WWW-Authenticate` on rejection
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            shutdown_timeout: Duration::from_secs(30),
            realm: "gate".to_string(),
        }
    }
}

/// Credential verification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Standard-base64 Ed25519 public key
    pub public_key: Option<String>,
}

/// User directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// URL of the CSV document
    pub url: Option<String>,
    /// Upper bound on a single fetch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Protected backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend URL; embedded credentials are sent as Basic auth
    pub url: Option<String>,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Overall request timeout (none = unbounded, for long streams)
    #[serde(with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Response headers never relayed to the caller
    pub strip_response_headers: Vec<String>,
    /// Also return `X-User` to the caller
    pub expose_user_header: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout: Duration::from_secs(10),
            timeout: None,
            strip_response_headers: DEFAULT_STRIPPED_RESPONSE_HEADERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            expose_user_header: false,
        }
    }
}

/// Source of the caller's address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAddressSource {
    /// Peer address of the TCP connection
    #[default]
    Direct,
    /// An entry of a forwarded-for header set by a fronting proxy
    ForwardedFor,
}

/// Client address derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientAddressConfig {
    /// Where the address comes from
    pub mode: ClientAddressSource,
    /// Header consulted in `forwarded_for` mode
    pub header: String,
    /// 1-based position counted from the right of the header list
    pub position_from_right: usize,
}

impl Default for ClientAddressConfig {
    fn default() -> Self {
        Self {
            mode: ClientAddressSource::Direct,
            header: "X-Forwarded-For".to_string(),
            position_from_right: 2,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        let extract = || -> Result<Self> {
            let mut figment = Figment::new();
            if let Some(p) = path {
                figment = figment.merge(Yaml::file(p));
            }
            // GATE_ prefix, `__` for nesting (GATE_BACKEND__URL)
            figment = figment.merge(Env::prefixed("GATE_").split("__"));
            figment.extract().map_err(|e| Error::Config(e.to_string()))
        };

        let config = extract()?;
        if config.env_files.is_empty() {
            return Ok(config);
        }

        // Env files may carry GATE_ variables, so extract again once loaded
        config.load_env_files();
        extract()
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {expanded}");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        }
    }

    /// Check that everything the gate needs is present and well formed
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self
            .credential
            .public_key
            .as_deref()
            .is_none_or(|k| k.trim().is_empty())
        {
            return Err(Error::Config("credential.public_key is required".to_string()));
        }

        require_url("directory.url", self.directory.url.as_deref())?;
        require_url("backend.url", self.backend.url.as_deref())?;

        if self.client_address.mode == ClientAddressSource::ForwardedFor {
            if self.client_address.position_from_right == 0 {
                return Err(Error::Config(
                    "client_address.position_from_right must be at least 1".to_string(),
                ));
            }
            if self.client_address.header.trim().is_empty() {
                return Err(Error::Config("client_address.header is required".to_string()));
            }
        }

        Ok(())
    }
}

fn require_url(field: &str, value: Option<&str>) -> Result<Url> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{field} is required")))?;
    Url::parse(value).map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))
}
