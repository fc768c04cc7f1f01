//! Built-in extractor reporting the size and SHA-256 digest of a payload.

use sha2::{Digest as _, Sha256};
use worker::{Extract, ExtractError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDigest;

/// Result of [`PayloadDigest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DigestSummary {
    /// Payload size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the payload
    pub sha256: String,
}

impl Extract for PayloadDigest {
    type Output = DigestSummary;

    fn description(&self) -> &str {
        "payload digest"
    }

    fn extract(&self, payload: &[u8]) -> Result<DigestSummary, ExtractError> {
        if payload.is_empty() {
            return Err(ExtractError::result_validation("payload is empty"));
        }

        Ok(DigestSummary {
            size: payload.len() as u64,
            sha256: format!("{:x}", Sha256::digest(payload)),
        })
    }
}
