//! Forwarding approved requests to the backend
//!
//! Every approved request lands on the backend's root path. The matched user
//! is passed along in the `X-User` header so the backend can trust the
//! identity without re-verifying the credential.

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::BackendConfig;
use crate::directory::UserRecord;
use crate::{Error, Result};

/// Header carrying the JSON-encoded matched user
pub const USER_HEADER: &str = "x-user";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers never relayed in either direction
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Proxies approved requests to a single backend
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    target: Url,
    authorization: Option<HeaderValue>,
    strip_response_headers: Vec<HeaderName>,
    expose_user_header: bool,
}

impl Forwarder {
    /// Build a forwarder from backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("backend.url is required".to_string()))?;
        let url = Url::parse(url).map_err(|e| Error::Config(format!("Invalid backend URL: {e}")))?;

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build backend client: {e}")))?;

        let strip_response_headers = config
            .strip_response_headers
            .iter()
            .map(|name| {
                HeaderName::try_from(name.as_str())
                    .map_err(|e| Error::Config(format!("Invalid header name '{name}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_parts(client, url, strip_response_headers, config.expose_user_header)
    }

    /// Build a forwarder around an existing client
    pub fn from_parts(
        client: Client,
        backend: Url,
        strip_response_headers: Vec<HeaderName>,
        expose_user_header: bool,
    ) -> Result<Self> {
        if !matches!(backend.scheme(), "http" | "https") || backend.host_str().is_none() {
            return Err(Error::Config(format!(
                "Backend URL must be an absolute http(s) URL: {backend}"
            )));
        }

        let authorization = backend_authorization(&backend)?;

        let mut target = backend;
        // Credentials travel in the Authorization header, never in the URL
        let _ = target.set_username("");
        let _ = target.set_password(None);
        target.set_fragment(None);
        let root = root_path(target.path());
        target.set_path(&root);

        Ok(Self {
            client,
            target,
            authorization,
            strip_response_headers,
            expose_user_header,
        })
    }

    /// Backend URL for a request whose original query was `inbound_query`
    #[must_use]
    pub fn target_url(&self, inbound_query: Option<&str>) -> Url {
        let mut url = self.target.clone();
        let merged = match (self.target.query(), inbound_query) {
            (Some(ours), Some(theirs)) if !ours.is_empty() && !theirs.is_empty() => {
                Some(format!("{ours}&{theirs}"))
            }
            (Some(ours), _) if !ours.is_empty() => Some(ours.to_string()),
            (_, Some(theirs)) if !theirs.is_empty() => Some(theirs.to_string()),
            _ => None,
        };
        url.set_query(merged.as_deref());
        url
    }

    /// Proxy `request` for `user`, streaming bodies in both directions.
    ///
    /// `peer` is appended to `X-Forwarded-For`.
    pub async fn forward(
        &self,
        request: Request<Body>,
        peer: IpAddr,
        user: &UserRecord,
    ) -> Result<Response<Body>> {
        let user_json = HeaderValue::from_str(&serde_json::to_string(user)?)
            .map_err(|e| Error::Internal(format!("User record is not a valid header value: {e}")))?;

        let (parts, body) = request.into_parts();
        let url = self.target_url(parts.uri.query());

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        append_forwarded_for(&mut headers, peer);
        if let Some(ref auth) = self.authorization {
            headers.insert(header::AUTHORIZATION, auth.clone());
        }
        headers.insert(HeaderName::from_static(USER_HEADER), user_json.clone());

        debug!(method = %parts.method, url = %url, user = %user.id, "Forwarding to backend");

        let mut outbound = self.client.request(parts.method, url).headers(headers);
        // Requests without a body (typical GETs) must not turn into chunked uploads
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outbound
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        for name in &self.strip_response_headers {
            response_headers.remove(name);
        }
        if self.expose_user_header {
            response_headers.insert(HeaderName::from_static(USER_HEADER), user_json);
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Basic credentials embedded in the backend URL, if any
fn backend_authorization(url: &Url) -> Result<Option<HeaderValue>> {
    if url.username().is_empty() && url.password().is_none() {
        return Ok(None);
    }

    let decode = |raw: &str| {
        urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .map_err(|e| Error::Config(format!("Backend URL credentials are not UTF-8: {e}")))
    };
    let username = decode(url.username())?;
    let password = decode(url.password().unwrap_or(""))?;

    let encoded = STANDARD.encode(format!("{username}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}"))
        .map(Some)
        .map_err(|e| Error::Config(format!("Invalid backend credentials: {e}")))
}

/// Backend path joined with `/`
fn root_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Remove hop-by-hop headers, including any the `Connection` header names
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        peer.to_string()
    } else {
        format!("{}, {peer}", prior.join(", "))
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(FORWARDED_FOR, value);
    }
}
