//! Request signing for the open-platform HTTP API.
//!
//! Each request carries six `x-bili-*` headers and an `Authorization`
//! header holding `HMAC-SHA256(secret, canonical)`, where `canonical` is the
//! `key:value` lines of the six headers sorted by key.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::Rng;
use sha2::Sha256;

/// Header: unix seconds.
pub const HEADER_TIMESTAMP: &str = "x-bili-timestamp";
/// Header: signature algorithm.
pub const HEADER_SIGNATURE_METHOD: &str = "x-bili-signature-method";
/// Header: per-request nonce.
pub const HEADER_NONCE: &str = "x-bili-signature-nonce";
/// Header: access key id.
pub const HEADER_ACCESS_KEY: &str = "x-bili-accesskeyid";
/// Header: signature scheme version.
pub const HEADER_SIGNATURE_VERSION: &str = "x-bili-signature-version";
/// Header: MD5 of the request body.
pub const HEADER_CONTENT_MD5: &str = "x-bili-content-md5";

const SIGNATURE_METHOD: &str = "HMAC-SHA256";
const SIGNATURE_VERSION: &str = "1.0";

/// Signs request bodies with an access key pair.
#[derive(Clone)]
pub struct RequestSigner {
    access_key: String,
    access_secret: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

impl RequestSigner {
    /// Signer for the given key pair.
    pub fn new(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }

    /// Headers for `body` using the current time and a fresh nonce.
    pub fn sign(&self, body: &str) -> BTreeMap<String, String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        let millis = now.as_millis() as u64;
        let nonce = rand::rng().random_range(1..100_000u64) + millis;
        self.sign_with(body, now.as_secs(), nonce)
    }

    /// Headers for `body` at a fixed timestamp and nonce.
    ///
    /// Pure: identical inputs always produce identical headers.
    pub fn sign_with(&self, body: &str, timestamp: u64, nonce: u64) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let _ = headers.insert(HEADER_TIMESTAMP.to_string(), timestamp.to_string());
        let _ = headers.insert(
            HEADER_SIGNATURE_METHOD.to_string(),
            SIGNATURE_METHOD.to_string(),
        );
        let _ = headers.insert(HEADER_NONCE.to_string(), nonce.to_string());
        let _ = headers.insert(HEADER_ACCESS_KEY.to_string(), self.access_key.clone());
        let _ = headers.insert(
            HEADER_SIGNATURE_VERSION.to_string(),
            SIGNATURE_VERSION.to_string(),
        );
        let _ = headers.insert(HEADER_CONTENT_MD5.to_string(), md5_hex(body.as_bytes()));

        let signature = hmac_sha256_hex(&self.access_secret, &canonical_string(&headers));

        let _ = headers.insert("Authorization".to_string(), signature);
        let _ = headers.insert("Content-Type".to_string(), "application/json".to_string());
        let _ = headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }
}

/// `key:value` lines of the `x-bili-*` headers, sorted by key.
pub fn canonical_string(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .filter(|(k, _)| k.starts_with("x-bili-"))
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Lowercase hex HMAC-SHA256.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message.as_bytes());
    format!("{:x}", mac.finalize().into_bytes())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
