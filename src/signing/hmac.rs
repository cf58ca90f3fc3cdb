//! Per-venue request and subscription signing.
//!
//! Two schemes are in use: Backpack signs an instruction string and sends the
//! signature base64-encoded, Aster signs the raw query string and sends it
//! hex-encoded (Binance-compatible). Both are HMAC-SHA256 over the venue's
//! API secret.

use crate::error::{GridError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Current timestamp in milliseconds
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock is before UNIX epoch")
        .as_millis() as i64
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GridError::Internal(format!("Invalid {} header: {}", name, e)))
}

/// Instruction-based signer (Backpack scheme).
///
/// `signature = base64(hmac_sha256(secret, "instruction=I&timestamp=T&window=W"))`
/// where the secret itself is base64-encoded key material.
#[derive(Clone)]
pub struct InstructionSigner {
    api_key: String,
    secret: String,
    window_ms: u32,
}

impl InstructionSigner {
    pub fn new(api_key: String, secret: String) -> Self {
        Self {
            api_key,
            secret,
            window_ms: 5000,
        }
    }

    /// Sign an API instruction for the given timestamp.
    pub fn sign(&self, instruction: &str, timestamp: i64) -> Result<String> {
        let message = format!(
            "instruction={}&timestamp={}&window={}",
            instruction, timestamp, self.window_ms
        );

        let secret_bytes = BASE64
            .decode(&self.secret)
            .map_err(|e| GridError::Signature(format!("Invalid secret encoding: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| GridError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(message.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build authentication headers for a REST request.
    pub fn build_headers(&self, instruction: &str) -> Result<HeaderMap> {
        let timestamp = timestamp_ms();
        let signature = self.sign(instruction, timestamp)?;

        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", header_value("api key", &self.api_key)?);
        headers.insert("X-Signature", header_value("signature", &signature)?);
        headers.insert("X-Timestamp", header_value("timestamp", &timestamp.to_string())?);
        headers.insert("X-Window", header_value("window", &self.window_ms.to_string())?);
        Ok(headers)
    }

    /// Signature array for a push-channel subscribe frame:
    /// `[verifying_key, signature, timestamp, window]`.
    pub fn subscribe_signature(&self) -> Result<[String; 4]> {
        let timestamp = timestamp_ms();
        let signature = self.sign("subscribe", timestamp)?;
        Ok([
            self.api_key.clone(),
            signature,
            timestamp.to_string(),
            self.window_ms.to_string(),
        ])
    }
}

/// Query-string signer (Aster scheme, Binance-compatible).
///
/// `signature = hex(hmac_sha256(secret, query))` appended as a `signature`
/// query parameter; the key travels in `X-MBX-APIKEY`.
#[derive(Clone)]
pub struct QuerySigner {
    api_key: String,
    secret: String,
}

impl QuerySigner {
    pub fn new(api_key: String, secret: String) -> Self {
        Self { api_key, secret }
    }

    pub fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GridError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Append timestamp and signature to a query string.
    pub fn signed_query(&self, query: &str) -> Result<String> {
        let stamped = if query.is_empty() {
            format!("timestamp={}", timestamp_ms())
        } else {
            format!("{}&timestamp={}", query, timestamp_ms())
        };
        let signature = self.sign(&stamped)?;
        Ok(format!("{}&signature={}", stamped, signature))
    }

    pub fn api_key_header(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-mbx-apikey"),
            header_value("api key", &self.api_key)?,
        );
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_signature_is_stable_base64() {
        let signer = InstructionSigner::new("pk".to_string(), BASE64.encode(b"test-secret"));
        let a = signer.sign("executeOrder", 1704067200000).unwrap();
        let b = signer.sign("executeOrder", 1704067200000).unwrap();
        assert_eq!(a, b);
        assert!(BASE64.decode(&a).is_ok());

        // Different instruction, different signature
        let c = signer.sign("cancelOrder", 1704067200000).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn instruction_signer_rejects_bad_secret() {
        let signer = InstructionSigner::new("pk".to_string(), "not base64!!".to_string());
        assert!(signer.sign("executeOrder", 0).is_err());
    }

    #[test]
    fn query_signature_is_lowercase_hex() {
        let signer = QuerySigner::new("pk".to_string(), "secret".to_string());
        let sig = signer.sign("symbol=BTCUSDT&side=BUY").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let signer = QuerySigner::new("pk".to_string(), "secret".to_string());
        let q = signer.signed_query("symbol=BTCUSDT").unwrap();
        assert!(q.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(q.contains("&signature="));
    }
}
