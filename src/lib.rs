//! Credential Gate Library
//!
//! Authenticating reverse-proxy gate. A request reaches the protected
//! backend only when it carries a valid signed credential that resolves to
//! an active, unexpired directory user calling from an allowed address.
//!
//! # Pipeline
//!
//! - **Credential**: Ed25519 signed message in the Basic auth password
//! - **Directory**: user table fetched as CSV on every request
//! - **Authorization**: status, expiry and address allowlist checks
//! - **Forwarding**: streamed proxy to the backend root with `X-User`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod cli;
pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod forward;
pub mod gate;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
