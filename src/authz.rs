//! Authorization decisions for a verified identity
//!
//! A user is approved only when all three hold: status is `ACTIVE`, the
//! expiry day has not passed, and the caller's address is allowlisted.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::directory::UserRecord;

/// Status value that grants access
pub const ACTIVE_STATUS: &str = "ACTIVE";

/// Address allowlist entry matching any caller
pub const ANY_ADDRESS: &str = "*";

/// Date layout of `expired_at`
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d";

/// How an `expired_at` value that is not a valid date is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnparseableExpiry {
    /// Use the zero date, so the user is always expired
    AlwaysExpired,
}

/// Policy applied to unparseable expiry dates. Treating them as valid would
/// grant access forever.
pub const UNPARSEABLE_EXPIRY_POLICY: UnparseableExpiry = UnparseableExpiry::AlwaysExpired;

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No directory row for the identity
    UnknownIdentity,
    /// Status is not `ACTIVE`
    Inactive,
    /// Expiry day has passed (or is unparseable)
    Expired,
    /// Remote address not in the allowlist
    AddressNotAllowed,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownIdentity => "unknown identity",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::AddressNotAllowed => "address not allowed",
        };
        f.write_str(s)
    }
}

/// Result of evaluating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    /// Whether the request may be forwarded
    pub approved: bool,
    /// First directory row matching the identity, if any
    pub user: Option<UserRecord>,
    /// Every failed condition (empty when approved)
    pub reasons: Vec<DenyReason>,
}

impl AuthorizationDecision {
    /// Failed conditions joined for log output
    #[must_use]
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Decide whether `identity`, calling from `remote_address` at `now`, may
/// reach the backend. First matching row wins for duplicate ids.
#[must_use]
pub fn evaluate(
    identity: &str,
    records: &[UserRecord],
    remote_address: &str,
    now: DateTime<Utc>,
) -> AuthorizationDecision {
    let Some(user) = records.iter().find(|r| r.id == identity) else {
        return AuthorizationDecision {
            approved: false,
            user: None,
            reasons: vec![DenyReason::UnknownIdentity],
        };
    };

    let mut reasons = Vec::new();
    if is_expired(&user.expired_at, now) {
        reasons.push(DenyReason::Expired);
    }
    if user.status != ACTIVE_STATUS {
        reasons.push(DenyReason::Inactive);
    }
    if !is_address_allowed(&user.allowed_addresses, remote_address) {
        reasons.push(DenyReason::AddressNotAllowed);
    }

    AuthorizationDecision {
        approved: reasons.is_empty(),
        user: Some(user.clone()),
        reasons,
    }
}

/// Exact string match against a comma-separated allowlist, all whitespace
/// removed first. No CIDR, no address normalization.
#[must_use]
pub fn is_address_allowed(allowed: &str, remote_address: &str) -> bool {
    let compact: String = allowed.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .any(|entry| entry == ANY_ADDRESS || entry == remote_address)
}

/// Start of the expiry day in UTC, or the zero date when unparseable
#[must_use]
pub fn expiry_instant(expired_at: &str) -> DateTime<Utc> {
    match NaiveDate::parse_from_str(expired_at, EXPIRY_FORMAT) {
        Ok(date) => date.and_time(NaiveTime::MIN).and_utc(),
        Err(_) => match UNPARSEABLE_EXPIRY_POLICY {
            UnparseableExpiry::AlwaysExpired => DateTime::<Utc>::MIN_UTC,
        },
    }
}

/// Expired when `now` is strictly after the start of the expiry day
#[must_use]
pub fn is_expired(expired_at: &str, now: DateTime<Utc>) -> bool {
    now > expiry_instant(expired_at)
}
