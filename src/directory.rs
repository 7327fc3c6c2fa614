//! Remote user directory
//!
//! The directory is a CSV document (typically a published spreadsheet) with
//! one row per user. It is fetched fresh for every request; nothing here
//! caches.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// One row of the user directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Primary key, matched against the credential identity
    pub id: String,
    /// Must be exactly `ACTIVE` to be authorized
    pub status: String,
    /// Free-form explanation of the status
    pub status_reason: String,
    /// Comma-separated literal IPs, or `*`
    pub allowed_addresses: String,
    /// Concurrent session cap (not enforced by the gate)
    pub simultaneity_cap: i64,
    /// Bandwidth allowance (not enforced by the gate)
    pub bandwidth: i64,
    /// `YYYY-MM-DD`
    pub created_at: String,
    /// `YYYY-MM-DD`
    pub updated_at: String,
    /// `YYYY-MM-DD`; the user is expired once this day has begun (UTC)
    pub expired_at: String,
}

/// Row layout of the directory CSV
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DirectoryRow {
    #[serde(rename = "UID")]
    uid: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "StatusReason")]
    status_reason: String,
    #[serde(rename = "IPs")]
    ips: String,
    #[serde(rename = "Slots", deserialize_with = "lenient_int")]
    slots: i64,
    #[serde(rename = "Bandwidth", deserialize_with = "lenient_int")]
    bandwidth: i64,
    #[serde(rename = "CreatedAt")]
    created_at: String,
    #[serde(rename = "UpdatedAt")]
    updated_at: String,
    #[serde(rename = "ExpiredAt")]
    expired_at: String,
}

impl From<DirectoryRow> for UserRecord {
    fn from(row: DirectoryRow) -> Self {
        Self {
            id: row.uid,
            status: row.status,
            status_reason: row.status_reason,
            allowed_addresses: row.ips,
            simultaneity_cap: row.slots,
            bandwidth: row.bandwidth,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expired_at: row.expired_at,
        }
    }
}

/// Integer cell: surrounding whitespace ignored, empty reads as zero
fn lenient_int<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse().map_err(serde::de::Error::custom)
}

/// Parse a directory CSV document. Any malformed row fails the whole parse.
pub fn parse_directory<R: Read>(reader: R) -> Result<Vec<UserRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    csv_reader
        .deserialize::<DirectoryRow>()
        .map(|row| {
            row.map(UserRecord::from)
                .map_err(|e| Error::DirectoryUnavailable(format!("Malformed directory: {e}")))
        })
        .collect()
}

/// Source of user records
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch the full, current set of user records in source order
    async fn fetch(&self) -> Result<Vec<UserRecord>>;
}

/// Directory served as CSV over HTTP
pub struct HttpDirectory {
    client: Client,
    url: Url,
}

impl HttpDirectory {
    /// Create a directory client for `url` with a bounded fetch duration
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build directory client: {e}")))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn fetch(&self) -> Result<Vec<UserRecord>> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::DirectoryUnavailable(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::DirectoryUnavailable(e.to_string()))?;

        let records = parse_directory(body.as_ref())?;
        debug!(records = records.len(), "Fetched directory");
        Ok(records)
    }
}

/// Fixed in-memory directory
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    records: Vec<UserRecord>,
}

impl StaticDirectory {
    /// Serve `records` on every fetch
    #[must_use]
    pub fn new(records: Vec<UserRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn fetch(&self) -> Result<Vec<UserRecord>> {
        Ok(self.records.clone())
    }
}
