//! Error types for the credential gate

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the credential gate
pub type Result<T> = std::result::Result<T, Error>;

/// Credential gate errors
///
/// Every variant from `CredentialMissingOrMalformed` through `NotAuthorized`
/// is a rejection: the caller is told only that it is unauthorized.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No Basic auth header, or the credential could not be decoded
    #[error("Credential missing or malformed: {0}")]
    CredentialMissingOrMalformed(String),

    /// Signature invalid, wrong key, or tampered payload
    #[error("Credential verification failed")]
    VerificationFailed,

    /// The caller's address could not be derived from the request
    #[error("Client address unavailable: {0}")]
    ClientAddressUnavailable(String),

    /// The user directory could not be fetched or parsed
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Verified identity has no directory row
    #[error("Identity not found in directory: {0}")]
    IdentityNotFound(String),

    /// Matched user failed the status, expiry, or address check
    #[error("User {identity} not authorized: {reason}")]
    NotAuthorized {
        /// Identity that was evaluated
        identity: String,
        /// Failed conditions, for logs only
        reason: String,
    },

    /// Forwarding to the backend failed after approval
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the request was evaluated and refused, as opposed to the gate
    /// failing to evaluate it.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CredentialMissingOrMalformed(_)
                | Self::VerificationFailed
                | Self::ClientAddressUnavailable(_)
                | Self::IdentityNotFound(_)
                | Self::NotAuthorized { .. }
        )
    }

    /// HTTP status shown to the caller
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_rejection() => StatusCode::UNAUTHORIZED,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly label for log fields
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::CredentialMissingOrMalformed(_) => "credential_malformed",
            Self::VerificationFailed => "verification_failed",
            Self::ClientAddressUnavailable(_) => "client_address_unavailable",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
            Self::IdentityNotFound(_) => "identity_not_found",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Internal(_) => "internal",
        }
    }
}
