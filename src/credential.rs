//! Signed credential extraction and verification
//!
//! A credential is the password half of a Basic `Authorization` header. It is
//! the base64url (unpadded) encoding of a NaCl-style signed message: a 64-byte
//! Ed25519 signature immediately followed by the payload, which is the
//! caller's identity.

use std::fmt;

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Verifier, VerifyingKey};

use crate::{Error, Result};

/// Identity string carried inside a verified credential
pub type Identity = String;

/// Public key that credentials must be signed with
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Decode a standard-base64 Ed25519 public key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Config(format!("Public key is not valid base64: {e}")))?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = raw.as_slice().try_into().map_err(|_| {
            Error::Config(format!(
                "Public key must be {PUBLIC_KEY_LENGTH} bytes, got {}",
                raw.len()
            ))
        })?;

        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| Error::Config(format!("Public key is not a valid Ed25519 key: {e}")))
    }

    /// Wrap an existing verifying key
    #[must_use]
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", STANDARD.encode(self.0.as_bytes()))
    }
}

/// Pull the raw signed bytes out of the `Authorization` header.
///
/// The username half of the Basic credential is ignored.
pub fn extract_credential(headers: &HeaderMap) -> Result<Vec<u8>> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| Error::CredentialMissingOrMalformed("no Authorization header".into()))?
        .to_str()
        .map_err(|_| Error::CredentialMissingOrMalformed("non-ASCII Authorization header".into()))?;

    let password = basic_password(value)?;

    URL_SAFE_NO_PAD
        .decode(password)
        .map_err(|e| Error::CredentialMissingOrMalformed(format!("credential is not base64url: {e}")))
}

/// Parse `Basic <base64(user:pass)>` and return the password
fn basic_password(value: &str) -> Result<String> {
    const PREFIX: &str = "Basic ";

    let encoded = value
        .get(..PREFIX.len())
        .filter(|scheme| scheme.eq_ignore_ascii_case(PREFIX))
        .map(|_| &value[PREFIX.len()..])
        .ok_or_else(|| Error::CredentialMissingOrMalformed("not a Basic credential".into()))?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| Error::CredentialMissingOrMalformed(format!("bad Basic encoding: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::CredentialMissingOrMalformed("Basic credential is not UTF-8".into()))?;

    decoded
        .split_once(':')
        .map(|(_, password)| password.to_string())
        .ok_or_else(|| Error::CredentialMissingOrMalformed("Basic credential has no ':'".into()))
}

/// Verify a signed message and return the identity it carries.
///
/// Any tampering, wrong key, truncated input or non-UTF-8 payload yields
/// [`Error::VerificationFailed`].
pub fn verify(signed: &[u8], key: &PublicKey) -> Result<Identity> {
    if signed.len() < SIGNATURE_LENGTH {
        return Err(Error::VerificationFailed);
    }

    let (sig_bytes, message) = signed.split_at(SIGNATURE_LENGTH);
    let signature = Signature::from_slice(sig_bytes).map_err(|_| Error::VerificationFailed)?;

    key.0
        .verify(message, &signature)
        .map_err(|_| Error::VerificationFailed)?;

    String::from_utf8(message.to_vec()).map_err(|_| Error::VerificationFailed)
}
