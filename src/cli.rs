//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ClientAddressSource, Config};

/// Authenticating reverse-proxy gate
#[derive(Parser, Debug, Default)]
#[command(name = "credential-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GATE_HOST")]
    pub host: Option<String>,

    /// URL of the CSV user directory
    #[arg(long, env = "SHEET_URL")]
    pub directory_url: Option<String>,

    /// URL of the protected backend (credentials in the URL become Basic auth)
    #[arg(long, env = "TC_URL")]
    pub backend_url: Option<String>,

    /// Base64 Ed25519 public key credentials are signed with
    #[arg(long, env = "PUB_KEY", hide_env_values = true)]
    pub public_key: Option<String>,

    /// Running behind a Cloud Foundry router: take the caller address from
    /// the last-but-one X-Forwarded-For entry
    #[arg(long)]
    pub cloudfoundry: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GATE_LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(ref url) = self.directory_url {
            config.directory.url = Some(url.clone());
        }
        if let Some(ref url) = self.backend_url {
            config.backend.url = Some(url.clone());
        }
        if let Some(ref key) = self.public_key {
            config.credential.public_key = Some(key.clone());
        }
        if self.cloudfoundry {
            config.client_address.mode = ClientAddressSource::ForwardedFor;
            config.client_address.header = "X-Forwarded-For".to_string();
            config.client_address.position_from_right = 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::try_parse_from([
            "credential-gate",
            "--port",
            "9999",
            "--directory-url",
            "http://dir/users.csv",
            "--backend-url",
            "http://backend",
            "--public-key",
            "a2V5",
            "--cloudfoundry",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.directory.url.as_deref(), Some("http://dir/users.csv"));
        assert_eq!(config.backend.url.as_deref(), Some("http://backend"));
        assert_eq!(config.credential.public_key.as_deref(), Some("a2V5"));
        assert_eq!(config.client_address.mode, ClientAddressSource::ForwardedFor);
        assert_eq!(config.client_address.position_from_right, 2);
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let mut config = Config::default();
        config.backend.url = Some("http://from-file".to_string());

        Cli {
            log_level: "info".to_string(),
            ..Default::default()
        }
        .apply_overrides(&mut config);

        assert_eq!(config.backend.url.as_deref(), Some("http://from-file"));
        assert_eq!(config.client_address.mode, ClientAddressSource::Direct);
    }
}
