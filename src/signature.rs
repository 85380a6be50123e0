//! Device signature store: persisted node id and EUI-64.
//!
//! The signature is written at provisioning time and only ever read here.
//! File layout (TOML):
//! ```text
//! node_id = 0x0123
//! eui64   = "70B3D5FFFE000123"   # 16 hex digits, ':' or '-' separators allowed
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::comms::{AM_BROADCAST_ADDR, AmAddr, Eui64};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("no signature at {0}")]
    Missing(PathBuf),
    #[error("signature unreadable: {0}")]
    Malformed(String),
    #[error("signature invalid: {0}")]
    Invalid(String),
}

/// Identity fields read from the signature area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSignature {
    pub node_id: AmAddr,
    pub eui64: Eui64,
}

impl DeviceSignature {
    /// Reject identifiers no real device may carry.
    pub fn validate(&self) -> Result<(), SignatureError> {
        if self.node_id == 0 || self.node_id == AM_BROADCAST_ADDR {
            return Err(SignatureError::Invalid(format!(
                "reserved node id {:04X}",
                self.node_id
            )));
        }
        if self.eui64.is_reserved() {
            return Err(SignatureError::Invalid(format!("reserved EUI-64 {}", self.eui64)));
        }
        Ok(())
    }
}

/// Source of the persisted device signature.
pub trait SignatureStore: Send + Sync {
    /// Read and validate the signature.
    fn read(&self) -> Result<DeviceSignature, SignatureError>;
}

#[derive(Deserialize)]
struct RawSignature {
    node_id: AmAddr,
    eui64: String,
}

/// Signature stored as a TOML file.
#[derive(Debug, Clone)]
pub struct FileSignatureStore {
    path: PathBuf,
}

impl FileSignatureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignatureStore for FileSignatureStore {
    fn read(&self) -> Result<DeviceSignature, SignatureError> {
        if !self.path.exists() {
            return Err(SignatureError::Missing(self.path.clone()));
        }
        let text = fs::read_to_string(&self.path).map_err(|e| {
            SignatureError::Malformed(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let raw: RawSignature = toml::from_str(&text)
            .map_err(|e| SignatureError::Malformed(format!("{}: {e}", self.path.display())))?;

        let signature = DeviceSignature {
            node_id: raw.node_id,
            eui64: parse_eui64(&raw.eui64)?,
        };
        signature.validate()?;
        Ok(signature)
    }
}

/// Parse 16 hex digits, optionally separated by `:` or `-`.
pub fn parse_eui64(text: &str) -> Result<Eui64, SignatureError> {
    let digits: String = text.chars().filter(|c| !matches!(c, ':' | '-')).collect();
    let bytes = hex::decode(&digits)
        .map_err(|e| SignatureError::Malformed(format!("eui64 '{text}': {e}")))?;
    let bytes: [u8; Eui64::LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
        SignatureError::Malformed(format!("eui64 '{text}' is {} bytes, expected 8", b.len()))
    })?;
    Ok(Eui64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> FileSignatureStore {
        let path = dir.path().join("signature.toml");
        fs::write(&path, body).unwrap();
        FileSignatureStore::new(path)
    }

    #[test]
    fn reads_valid_signature() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, "node_id = 0x0123\neui64 = \"70:B3:D5:FF:FE:00:01:23\"\n");
        let sig = store.read().unwrap();
        assert_eq!(sig.node_id, 0x0123);
        assert_eq!(sig.eui64, Eui64([0x70, 0xB3, 0xD5, 0xFF, 0xFE, 0x00, 0x01, 0x23]));
    }

    #[test]
    fn missing_file() {
        let dir = TempDir::new().unwrap();
        let store = FileSignatureStore::new(dir.path().join("absent.toml"));
        assert!(matches!(store.read(), Err(SignatureError::Missing(_))));
    }

    #[test]
    fn garbage_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, "\u{0}\u{1}not toml");
        assert!(matches!(store.read(), Err(SignatureError::Malformed(_))));
    }

    #[test]
    fn short_eui_is_malformed() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, "node_id = 7\neui64 = \"0011\"\n");
        let err = store.read().unwrap_err();
        assert!(err.to_string().contains("expected 8"));
    }

    #[test]
    fn reserved_values_are_invalid() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, "node_id = 0xFFFF\neui64 = \"0000000000000007\"\n");
        assert!(matches!(store.read(), Err(SignatureError::Invalid(_))));

        let store = write(&dir, "node_id = 7\neui64 = \"FFFFFFFFFFFFFFFF\"\n");
        assert!(matches!(store.read(), Err(SignatureError::Invalid(_))));
    }
}
