//! Per-request gate controller
//!
//! Every inbound request, whatever its method or path, walks the same
//! stages. Any failure ends in one uniform response; the stage and cause
//! go to the logs only.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::client_addr::ClientAddressMode;
use crate::authz;
use crate::config::Config;
use crate::credential::{self, PublicKey};
use crate::directory::{Directory, HttpDirectory};
use crate::forward::Forwarder;
use crate::{Error, Result};

/// Progress of one request through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    /// Nothing checked yet
    Start,
    /// Signed bytes pulled from the Basic credential
    CredentialExtracted,
    /// Signature checked, identity known
    IdentityVerified,
    /// Identity matched a directory row
    UserResolved,
    /// Status, expiry and address checks passed
    Authorized,
    /// Backend responded (terminal)
    Forwarded,
    /// Refused or failed (terminal)
    Rejected,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::CredentialExtracted => "credential_extracted",
            Self::IdentityVerified => "identity_verified",
            Self::UserResolved => "user_resolved",
            Self::Authorized => "authorized",
            Self::Forwarded => "forwarded",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Immutable state shared by every request
pub struct GateState {
    /// Key credentials must be signed with
    pub public_key: PublicKey,
    /// User directory
    pub directory: Arc<dyn Directory>,
    /// Backend proxy
    pub forwarder: Forwarder,
    /// Caller address derivation
    pub client_address: ClientAddressMode,
    /// Realm for `WWW-Authenticate`
    pub realm: String,
}

impl GateState {
    /// Resolve configuration into ready-to-use state
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let public_key = PublicKey::from_base64(config.credential.public_key.as_deref().unwrap_or(""))?;

        let directory_url = config.directory.url.as_deref().unwrap_or("");
        let directory_url = Url::parse(directory_url)
            .map_err(|e| Error::Config(format!("Invalid directory URL: {e}")))?;
        let directory = HttpDirectory::new(directory_url, config.directory.timeout)?;

        Ok(Self {
            public_key,
            directory: Arc::new(directory),
            forwarder: Forwarder::new(&config.backend)?,
            client_address: ClientAddressMode::from_config(&config.client_address)?,
            realm: config.server.realm.clone(),
        })
    }
}

/// Stage tracker for one request
struct GateRun {
    stage: GateStage,
    peer: SocketAddr,
}

impl GateRun {
    fn new(peer: SocketAddr) -> Self {
        Self {
            stage: GateStage::Start,
            peer,
        }
    }

    fn advance(&mut self, next: GateStage) {
        debug!(peer = %self.peer, from = %self.stage, to = %next, "Gate stage");
        self.stage = next;
    }

    async fn execute(&mut self, state: &GateState, request: Request<Body>) -> Result<Response> {
        let remote = state.client_address.resolve(request.headers(), self.peer)?;
        debug!(peer = %self.peer, remote = %remote, "Resolved client address");

        let signed = credential::extract_credential(request.headers())?;
        self.advance(GateStage::CredentialExtracted);

        let identity = credential::verify(&signed, &state.public_key)?;
        self.advance(GateStage::IdentityVerified);

        let records = state.directory.fetch().await?;
        let decision = authz::evaluate(&identity, &records, &remote, Utc::now());
        let Some(user) = decision.user.as_ref() else {
            return Err(Error::IdentityNotFound(identity));
        };
        self.advance(GateStage::UserResolved);

        if !decision.approved {
            return Err(Error::NotAuthorized {
                identity,
                reason: decision.reason_summary(),
            });
        }
        self.advance(GateStage::Authorized);
        info!(user = %user.id, remote = %remote, decision = true, "Request authorized");

        let response = state.forwarder.forward(request, self.peer.ip(), user).await?;
        self.advance(GateStage::Forwarded);
        Ok(response)
    }

    fn reject(&mut self, err: &Error) {
        let failed_at = self.stage;
        self.advance(GateStage::Rejected);

        if err.is_rejection() {
            warn!(
                peer = %self.peer,
                stage = %failed_at,
                kind = err.kind(),
                error = %err,
                decision = false,
                "Request rejected"
            );
        } else {
            error!(
                peer = %self.peer,
                stage = %failed_at,
                kind = err.kind(),
                error = %err,
                "Request failed"
            );
        }
    }
}

/// Fallback handler: gate every request
pub async fn gate_handler(
    State(state): State<Arc<GateState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let mut run = GateRun::new(peer);
    match run.execute(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            run.reject(&err);
            error_response(&err, &state.realm)
        }
    }
}

/// Uniform plain-text response for a failed request
fn error_response(err: &Error, realm: &str) -> Response {
    let status = err.status_code();
    let body = status.canonical_reason().unwrap_or("Error");
    let mut response = (status, body).into_response();

    if err.is_rejection() {
        if let Ok(challenge) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
        }
    }
    response
}
