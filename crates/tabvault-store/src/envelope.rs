//! Encrypted record wire format
//!
//! ```text
//! { "ciphertext": "<base64>", "nonce": "<base64>", "expiresAt": <epoch-ms> | null }
//! ```
//!
//! There is no explicit type tag. A physical record is an envelope if and
//! only if it parses as a JSON object whose fields are `ciphertext` and
//! `nonce` (both strings) plus an optional `expiresAt`, and nothing else.
//! Anything else is a raw record, which keeps never-migrated data readable.
//! A caller value with exactly that shape would be mistaken for an envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use tabvault_crypto::{CryptoError, CryptoResult, Sealed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Envelope {
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Envelope {
    pub fn seal(sealed: &Sealed, expires_at: Option<i64>) -> Self {
        Envelope {
            ciphertext: STANDARD.encode(&sealed.ciphertext),
            nonce: STANDARD.encode(sealed.nonce),
            expires_at,
        }
    }

    /// Structural detection: `Some` only for a well-formed envelope.
    ///
    /// A caller value that happens to be an object with exactly these fields
    /// is indistinguishable from an envelope and is treated as one.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn is_envelope(raw: &str) -> bool {
        Self::parse(raw).is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    /// Base64-decoded `(ciphertext, nonce)`.
    pub fn decode(&self) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| CryptoError::Encoding(format!("ciphertext: {e}")))?;
        let nonce = STANDARD
            .decode(&self.nonce)
            .map_err(|e| CryptoError::Encoding(format!("nonce: {e}")))?;
        Ok((ciphertext, nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabvault_crypto::NONCE_SIZE;

    fn sample() -> Sealed {
        Sealed {
            ciphertext: vec![1, 2, 3, 4],
            nonce: [9u8; NONCE_SIZE],
        }
    }

    #[test]
    fn test_wire_format_field_names() {
        let json = Envelope::seal(&sample(), Some(1_700_000_000_000))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ciphertext"], "AQIDBA==");
        assert_eq!(value["expiresAt"], 1_700_000_000_000i64);
        assert!(value["nonce"].is_string());
    }

    #[test]
    fn test_null_expiry_is_written() {
        let json = Envelope::seal(&sample(), None).to_json().unwrap();
        assert!(json.contains("\"expiresAt\":null"));
    }

    #[test]
    fn test_structural_detection() {
        assert!(Envelope::is_envelope(r#"{"ciphertext":"AA==","nonce":"AA=="}"#));
        assert!(Envelope::is_envelope(
            r#"{"ciphertext":"AA==","nonce":"AA==","expiresAt":null}"#
        ));
        assert!(Envelope::is_envelope(
            r#"{"ciphertext":"AA==","nonce":"AA==","expiresAt":12}"#
        ));

        // Raw records
        assert!(!Envelope::is_envelope(r#""just a string""#));
        assert!(!Envelope::is_envelope(r#"{"ciphertext":"AA=="}"#));
        assert!(!Envelope::is_envelope(
            r#"{"ciphertext":"AA==","nonce":"AA==","user":"bob"}"#
        ));
        assert!(!Envelope::is_envelope(r#"{"ciphertext":1,"nonce":"AA=="}"#));
        assert!(!Envelope::is_envelope("[1,2,3]"));
        assert!(!Envelope::is_envelope("{not json"));
    }

    #[test]
    fn test_expiry_boundary() {
        let env = Envelope::seal(&sample(), Some(1_000));
        assert!(!env.is_expired(999));
        assert!(env.is_expired(1_000));
        assert!(!Envelope::seal(&sample(), None).is_expired(i64::MAX));
    }

    #[test]
    fn test_decode_roundtrip() {
        let sealed = sample();
        let (ct, nonce) = Envelope::seal(&sealed, None).decode().unwrap();
        assert_eq!(ct, sealed.ciphertext);
        assert_eq!(nonce, sealed.nonce);
    }

    #[test]
    fn test_decode_bad_base64() {
        let env = Envelope {
            ciphertext: "%%%".into(),
            nonce: "AA==".into(),
            expires_at: None,
        };
        assert!(matches!(env.decode(), Err(CryptoError::Encoding(_))));
    }
}
