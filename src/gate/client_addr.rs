//! Caller address derivation

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName};

use crate::config::{ClientAddressConfig, ClientAddressSource};
use crate::{Error, Result};

/// How the caller's address is determined for allowlist checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAddressMode {
    /// IP of the TCP peer, without port
    Direct,
    /// Entry of a comma-separated forwarded header, counted from the right.
    /// Position 1 is the last entry, 2 the last-but-one.
    ForwardedFor {
        /// Header to read
        header: HeaderName,
        /// 1-based position from the right-hand end
        position_from_right: usize,
    },
}

impl ClientAddressMode {
    /// Resolve from configuration
    pub fn from_config(config: &ClientAddressConfig) -> Result<Self> {
        match config.mode {
            ClientAddressSource::Direct => Ok(Self::Direct),
            ClientAddressSource::ForwardedFor => {
                let header = HeaderName::try_from(config.header.as_str()).map_err(|e| {
                    Error::Config(format!("Invalid client_address.header '{}': {e}", config.header))
                })?;
                if config.position_from_right == 0 {
                    return Err(Error::Config(
                        "client_address.position_from_right must be at least 1".to_string(),
                    ));
                }
                Ok(Self::ForwardedFor {
                    header,
                    position_from_right: config.position_from_right,
                })
            }
        }
    }

    /// Address string compared against the user's allowlist
    pub fn resolve(&self, headers: &HeaderMap, peer: SocketAddr) -> Result<String> {
        match self {
            Self::Direct => Ok(peer.ip().to_string()),
            Self::ForwardedFor {
                header,
                position_from_right,
            } => {
                let joined = headers
                    .get_all(header)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .collect::<Vec<_>>()
                    .join(",");
                if joined.is_empty() {
                    return Err(Error::ClientAddressUnavailable(format!("no {header} header")));
                }

                let compact: String = joined.chars().filter(|c| *c != ' ').collect();
                let entries: Vec<&str> = compact.split(',').collect();

                entries
                    .len()
                    .checked_sub(*position_from_right)
                    .map(|idx| entries[idx])
                    .filter(|addr| !addr.is_empty())
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        Error::ClientAddressUnavailable(format!(
                            "{header} has {} entries, need position {position_from_right} from the right",
                            entries.len()
                        ))
                    })
            }
        }
    }
}
