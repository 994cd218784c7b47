//! Clear-key provisioning from the licensing endpoint.
//!
//! The endpoint answers `{ "keys": [ { "kid": "...", "k": "..." } ] }`. Each
//! key id and key must decode to exactly 16 bytes, either as 32 hex digits or
//! as unpadded base64url (the JWK form). Entries that fail are dropped with a
//! warning; the rest are handed to the engine keyed by lowercase hex.

use std::collections::BTreeMap;
use std::future::Future;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use surf_proto::state::Credentials;
use tracing::{info, warn};

use crate::error::KeyFetchError;

pub const KEY_LEN: usize = 16;

/// Key id (hex) → key (hex).
pub type ClearKeys = BTreeMap<String, String>;

#[derive(Debug, Deserialize)]
struct LicenseResponse {
    #[serde(default)]
    keys: Vec<LicenseKey>,
}

#[derive(Debug, Deserialize)]
struct LicenseKey {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    k: String,
}

/// Decode a 16-byte value from hex or base64url.
pub fn decode_key_bytes(value: &str) -> Option<[u8; KEY_LEN]> {
    let value = value.trim();
    if value.len() == KEY_LEN * 2 {
        let mut bytes = [0u8; KEY_LEN];
        if hex::decode_to_slice(value, &mut bytes).is_ok() {
            return Some(bytes);
        }
    }
    let bytes = URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).ok()?;
    bytes.try_into().ok()
}

/// Parse a licensing response body into the surviving key map.
pub fn parse_license_response(body: &str) -> Result<ClearKeys, KeyFetchError> {
    let response: LicenseResponse = serde_json::from_str(body)?;
    let mut keys = ClearKeys::new();
    for entry in response.keys {
        match (decode_key_bytes(&entry.kid), decode_key_bytes(&entry.k)) {
            (Some(kid), Some(k)) => {
                keys.insert(hex::encode(kid), hex::encode(k));
            }
            _ => warn!("drm: dropping invalid key entry kid={:?}", entry.kid),
        }
    }
    Ok(keys)
}

/// Where clear keys come from.
pub trait KeySource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<ClearKeys, KeyFetchError>> + Send;
}

/// Fetches the key set with the same Basic-auth scheme as the playlist.
#[derive(Clone)]
pub struct KeyProvisioner {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
}

impl KeyProvisioner {
    pub fn new(client: reqwest::Client, url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            url: url.into(),
            credentials,
        }
    }
}

impl KeySource for KeyProvisioner {
    async fn fetch(&self) -> Result<ClearKeys, KeyFetchError> {
        info!("drm: loading keys from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(KeyFetchError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        parse_license_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID_HEX: &str = "0123456789abcdef0123456789ABCDEF";
    const KEY_HEX: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn decodes_hex_and_base64url() {
        let from_hex = decode_key_bytes(KID_HEX).unwrap();
        assert_eq!(from_hex[0], 0x01);
        assert_eq!(from_hex[15], 0xef);

        let b64 = URL_SAFE_NO_PAD.encode(from_hex);
        assert_eq!(b64.len(), 22);
        assert_eq!(decode_key_bytes(&b64), Some(from_hex));
        assert_eq!(decode_key_bytes(&format!("{}==", b64)), Some(from_hex));
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert_eq!(decode_key_bytes(""), None);
        assert_eq!(decode_key_bytes("0011"), None);
        assert_eq!(decode_key_bytes(&"a".repeat(34)), None);
        assert_eq!(decode_key_bytes(&URL_SAFE_NO_PAD.encode([7u8; 15])), None);
    }

    #[test]
    fn drops_invalid_entries() {
        let body = format!(
            r#"{{ "keys": [
                {{ "kid": "{KID_HEX}", "k": "{KEY_HEX}" }},
                {{ "kid": "short", "k": "{KEY_HEX}" }},
                {{ "kid": "{KEY_HEX}" }}
            ] }}"#
        );
        let keys = parse_license_response(&body).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(
            keys.get("0123456789abcdef0123456789abcdef").map(String::as_str),
            Some(KEY_HEX)
        );
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(matches!(
            parse_license_response("<html>"),
            Err(KeyFetchError::Malformed(_))
        ));
        assert!(parse_license_response("{}").unwrap().is_empty());
    }
}
