//! Query fingerprinting
//!
//! Maps a query's text to a fixed-width key. The same text always yields the
//! same key, in every process and after every restart, because the key
//! addresses chunk sets that outlive the process.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed-width deterministic hash of a query's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryFingerprint(pub [u8; 16]);

impl QueryFingerprint {
    /// Fingerprint a query: SHA-256 of the raw text, truncated to 128 bits
    pub fn of(query: &str) -> Self {
        let digest = Sha256::digest(query.as_bytes());
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        QueryFingerprint(key)
    }

    /// Lowercase hex form, 32 characters
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
