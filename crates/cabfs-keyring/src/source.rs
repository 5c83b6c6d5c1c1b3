//! Credential sources that can unwrap a container's master key

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Failures at the credential boundary. Produced by KeySource
/// implementations and propagated unchanged by everything above them.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("hardware token not present")]
    TokenNotFound,
    #[error("all authentication attempts failed")]
    AuthExhausted,
    #[error("{0}")]
    Backend(String),
}

/// A capability that identifies the content owner and unwraps the
/// container's master-key ciphertext.
///
/// Two implementations exist: the hardware-token session (separate crate,
/// PKCS#11-backed) and [`MemoryKeySource`], an offline replay of previously
/// captured key material.
pub trait KeySource {
    /// Content-owner identifier this credential is licensed for.
    fn owner_code(&self) -> &str;

    /// Unwrap the master-key ciphertext into the plaintext master key.
    fn unwrap_master(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CredentialError>;
}

/// Previously captured `(code, version, master)` credential record,
/// persisted as JSON by the `keyring --dump` tooling.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MemoryKeySource {
    pub code: String,
    pub version: String,
    #[serde(with = "cabfs_core::b64")]
    pub master: Vec<u8>,
}

impl KeySource for MemoryKeySource {
    fn owner_code(&self) -> &str {
        &self.code
    }

    // The replay source already holds the plaintext master key; the
    // ciphertext is ignored.
    fn unwrap_master(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, CredentialError> {
        Ok(self.master.clone())
    }
}

impl std::fmt::Debug for MemoryKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeySource")
            .field("code", &self.code)
            .field("version", &self.version)
            .field("master", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_roundtrip() {
        let source = MemoryKeySource {
            code: "05".into(),
            version: "1.6.0".into(),
            master: vec![0x42; 16],
        };

        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"code\":\"05\""), "unexpected json: {json}");
        assert!(
            !json.contains("66, 66"),
            "master bytes must serialize as base64, not an array"
        );

        let back: MemoryKeySource = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, source.code);
        assert_eq!(back.version, source.version);
        assert_eq!(back.master, source.master);
    }

    #[test]
    fn test_unwrap_ignores_ciphertext() {
        let source = MemoryKeySource {
            code: "05".into(),
            version: "1.0".into(),
            master: vec![7u8; 16],
        };
        let a = source.unwrap_master(&[0u8; 128]).unwrap();
        let b = source.unwrap_master(&[1u8; 128]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, source.master);
    }

    #[test]
    fn test_debug_redacts_master() {
        let source = MemoryKeySource {
            code: "05".into(),
            version: "1.0".into(),
            master: vec![0xAA; 16],
        };
        let out = format!("{source:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("170"));
    }
}
