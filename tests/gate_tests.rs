//! End-to-end gate tests
//!
//! Runs the gate, a CSV directory and a backend as real HTTP servers on
//! ephemeral ports and drives them with reqwest:
//! - Approved requests land on the backend root with `X-User`
//! - Rejections never reach the backend
//! - Directory and backend failures map to distinct statuses

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use credential_gate::config::{ClientAddressSource, Config};
use credential_gate::directory::{UserRecord, parse_directory};
use credential_gate::gate::{GateState, create_router};
use ed25519_dalek::{Signer, SigningKey};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;

const DIRECTORY_CSV: &str = "\
UID,Status,StatusReason,IPs,Slots,Bandwidth,CreatedAt,UpdatedAt,ExpiredAt
alice,ACTIVE,,*,2,500,2024-01-01,2024-06-01,2999-12-31
bob,SUSPENDED,chargeback,*,1,100,2024-01-01,2024-06-01,2999-12-31
carol,ACTIVE,,\"127.0.0.1 ,5.6.7.8\",1,100,2024-01-01,2024-06-01,2999-12-31
dave,ACTIVE,,10.1.1.1,1,100,2024-01-01,2024-06-01,2999-12-31
erin,ACTIVE,,*,1,100,2000-01-01,2000-06-01,2001-01-01
frank,ACTIVE,,198.51.100.7,1,100,2024-01-01,2024-06-01,2999-12-31
";

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Default)]
struct Backend {
    calls: Mutex<Vec<Captured>>,
}

impl Backend {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last(&self) -> Captured {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }
}

async fn backend_handler(
    State(backend): State<Arc<Backend>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    backend.calls.lock().unwrap().push(Captured {
        method,
        uri,
        headers,
        body,
    });

    (
        StatusCode::OK,
        [
            ("set-cookie", "session=abc"),
            ("server", "backend/1.0"),
            ("cf-ray", "1234-AMS"),
            ("via", "1.1 cdn"),
            ("expect-ct", "max-age=0"),
            ("x-backend", "yes"),
        ],
        "hello from backend",
    )
}

async fn directory_handler(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    DIRECTORY_CSV
}

async fn broken_directory_handler(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "sheet offline")
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

struct Harness {
    gate: SocketAddr,
    backend: Arc<Backend>,
    directory_hits: Arc<AtomicUsize>,
    client: reqwest::Client,
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[11; 32])
}

fn credential(identity: &str) -> String {
    let mut signed = signing_key().sign(identity.as_bytes()).to_bytes().to_vec();
    signed.extend_from_slice(identity.as_bytes());
    URL_SAFE_NO_PAD.encode(signed)
}

async fn harness_with(configure: impl FnOnce(&mut Config), backend_url: Option<String>) -> Harness {
    let directory_hits = Arc::new(AtomicUsize::new(0));
    let directory = spawn(
        Router::new()
            .route("/users.csv", get(directory_handler))
            .route("/broken.csv", get(broken_directory_handler))
            .with_state(Arc::clone(&directory_hits)),
    )
    .await;

    let backend = Arc::new(Backend::default());
    let backend_addr = spawn(
        Router::new()
            .fallback(backend_handler)
            .with_state(Arc::clone(&backend)),
    )
    .await;

    let mut config = Config::default();
    config.credential.public_key = Some(STANDARD.encode(signing_key().verifying_key().as_bytes()));
    config.directory.url = Some(format!("http://{directory}/users.csv"));
    config.backend.url =
        Some(backend_url.unwrap_or_else(|| format!("http://svc:s3cret@{backend_addr}")));
    configure(&mut config);

    let state = Arc::new(GateState::from_config(&config).unwrap());
    let gate = spawn(create_router(state)).await;

    Harness {
        gate,
        backend,
        directory_hits,
        client: reqwest::Client::new(),
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}, None).await
}

impl Harness {
    fn get(&self, path: &str, identity: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.client.get(format!("http://{}{path}", self.gate));
        match identity {
            Some(id) => builder.basic_auth("ignored", Some(credential(id))),
            None => builder,
        }
    }
}

fn directory_record(id: &str) -> UserRecord {
    parse_directory(DIRECTORY_CSV.as_bytes())
        .unwrap()
        .into_iter()
        .find(|r| r.id == id)
        .unwrap()
}

#[tokio::test]
async fn test_approved_request_lands_on_backend_root() {
    let h = harness().await;

    let response = h
        .client
        .post(format!("http://{}/deep/nested/path?page=2", h.gate))
        .basic_auth("ignored", Some(credential("alice")))
        .header("x-trace", "t-1")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(response.text().await.unwrap(), "hello from backend");

    for stripped in ["set-cookie", "server", "cf-ray", "via", "expect-ct"] {
        assert!(headers.get(stripped).is_none(), "{stripped} should be stripped");
    }
    assert_eq!(headers["x-backend"], "yes");
    assert!(headers.get("x-user").is_none());

    assert_eq!(h.backend.count(), 1);
    let seen = h.backend.last();
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.uri.path(), "/");
    assert_eq!(seen.uri.query(), Some("page=2"));
    assert_eq!(seen.body, Bytes::from_static(b"payload"));
    assert_eq!(seen.headers["x-trace"], "t-1");
    assert_eq!(seen.headers["x-forwarded-for"], "127.0.0.1");

    let user: UserRecord =
        serde_json::from_str(seen.headers["x-user"].to_str().unwrap()).unwrap();
    assert_eq!(user, directory_record("alice"));

    let expected_auth = format!("Basic {}", STANDARD.encode("svc:s3cret"));
    assert_eq!(seen.headers["authorization"], expected_auth.as_str());
}

#[tokio::test]
async fn test_rejections_never_reach_backend() {
    let h = harness().await;

    let no_credential = h.get("/", None).send().await.unwrap();
    assert_eq!(no_credential.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(no_credential.text().await.unwrap(), "Unauthorized");

    let garbage = h
        .client
        .get(format!("http://{}/", h.gate))
        .basic_auth("x", Some("not-a-signed-message"))
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);

    // unknown, inactive, address not allowed, expired
    for identity in ["nobody", "bob", "dave", "erin"] {
        let response = h.get("/", Some(identity)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{identity}");
        assert_eq!(response.text().await.unwrap(), "Unauthorized");
    }

    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn test_allowlist_whitespace_is_ignored() {
    let h = harness().await;

    let response = h.get("/", Some("carol")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.backend.count(), 1);
}

#[tokio::test]
async fn test_directory_failure_is_server_error() {
    let h = harness_with(
        |config| {
            let url = config.directory.url.take().unwrap();
            config.directory.url = Some(url.replace("users.csv", "broken.csv"));
        },
        None,
    )
    .await;

    let response = h.get("/", Some("alice")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "Internal Server Error");
    assert_eq!(h.directory_hits.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn test_identical_requests_are_evaluated_independently() {
    let h = harness().await;

    for _ in 0..2 {
        let response = h.get("/", Some("alice")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(h.directory_hits.load(Ordering::SeqCst), 2);
    assert_eq!(h.backend.count(), 2);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = closed.local_addr().unwrap();
    drop(closed);

    let h = harness_with(|_| {}, Some(format!("http://{dead}"))).await;

    let response = h.get("/", Some("alice")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");
}

#[tokio::test]
async fn test_forwarded_for_mode_uses_configured_position() {
    let h = harness_with(
        |config| config.client_address.mode = ClientAddressSource::ForwardedFor,
        None,
    )
    .await;

    let allowed = h
        .get("/", Some("frank"))
        .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let spoofed_tail = h
        .get("/", Some("frank"))
        .header("x-forwarded-for", "10.0.0.9, 198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(spoofed_tail.status(), StatusCode::UNAUTHORIZED);

    let missing = h.get("/", Some("frank")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(h.backend.count(), 1);
}

#[tokio::test]
async fn test_user_header_exposed_when_configured() {
    let h = harness_with(|config| config.backend.expose_user_header = true, None).await;

    let response = h.get("/", Some("alice")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let user: UserRecord =
        serde_json::from_str(response.headers()["x-user"].to_str().unwrap()).unwrap();
    assert_eq!(user.id, "alice");
    assert_eq!(user.bandwidth, 500);
}

#[tokio::test]
async fn test_custom_stripped_header_set() {
    let h = harness_with(
        |config| config.backend.strip_response_headers = vec!["X-Backend".to_string()],
        None,
    )
    .await;

    let response = h.get("/", Some("alice")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-backend").is_none());
    assert_eq!(response.headers()["server"], "backend/1.0");
}
